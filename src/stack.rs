pub mod channel;
pub mod metadata;
pub mod tiffio;

pub use channel::{isolate_channel, RawStack};
pub use metadata::ChannelDirectory;
pub use tiffio::{read_label_stack, read_tiff_stack, write_label_stack, write_tiff_stack_u16};
