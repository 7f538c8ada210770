mod client;

pub use client::{
    MergedMetrics, TwitterClient, TwitterError, TwitterTokenPair, UploadedMedia,
};
