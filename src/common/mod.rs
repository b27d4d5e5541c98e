//! 共通の抽象化レイヤーとトレイト定義

pub mod http;
pub mod traits;
pub mod utils;

pub use http::{MemoryRequest, MemoryResponse, Method, SharedResponse, StatusCode};
pub use traits::{Service, TransportRequest, TransportResponse, Validate};
