pub mod response;

pub use response::{jsonp, ApiResponse, ApiResult};
