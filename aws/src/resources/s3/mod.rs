pub mod directory_bucket;

pub use directory_bucket::DirectoryBucketResource;
