pub mod dns;
pub mod parser;
pub mod reader;

pub use parser::FrameDecoder;
pub use reader::CaptureReader;
