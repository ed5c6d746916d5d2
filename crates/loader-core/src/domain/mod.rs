//! 도메인 모델.

pub mod aggregate;
pub mod candle;
pub mod outcome;
pub mod session;
pub mod task;

pub use aggregate::*;
pub use candle::*;
pub use outcome::*;
pub use session::*;
pub use task::*;
