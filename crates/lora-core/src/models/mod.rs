//! Response shapes shared by the LoRA and recipe services.

mod api_response;
mod paginated;
mod responses;

pub use api_response::*;
pub use paginated::*;
pub use responses::*;
