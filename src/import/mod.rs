pub mod pipeline;
pub mod preview;
pub mod scanner;
pub mod transform;
pub mod util;
