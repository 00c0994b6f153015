mod block_cache;
mod fs_reader;
mod range_reader;
mod s3_reader;

pub use block_cache::{BlockCache, DEFAULT_BLOCK_SIZE};
pub use fs_reader::FsRangeReader;
pub use range_reader::{
    read_u16_be, read_u16_le, read_u32_be, read_u32_le, read_u64_be, read_u64_le, RangeReader,
};
pub use s3_reader::{create_s3_client, S3RangeReader};
