pub mod request;
pub mod response;
pub mod stream;

pub use request::{
    AuthMaterial, Endpoint, PreparedRequest, TranslateError, prepare_upstream_request,
};
pub use response::normalize_response;
pub use stream::{StreamTransformer, generate_chat_id};
