mod client;

pub use client::{
    ApiErrorClass, BucketClient, BucketCredentials, BucketError, ObjectPage, ObjectSummary,
};
