// Asset loading - Asynchronous resource requests with completions over a ringbuf
//
// Loaders may answer from any thread, immediately or much later. Completions land in
// a lock-free queue that the owner drains on its own schedule, so a loader calling
// back synchronously never re-enters the requester.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use ringbuf::traits::{Consumer, Producer};
use thiserror::Error;

use super::backend::AudioBufferId;
use crate::messaging::channels::{AssetConsumer, AssetProducer, create_asset_channel};

#[derive(Debug, Clone, PartialEq, Error)]
pub enum AssetError {
    #[error("Asset not found: {0}")]
    NotFound(String),

    #[error("Failed to decode {resource}: {reason}")]
    Decode { resource: String, reason: String },

    #[error("Loader unavailable: {0}")]
    Unavailable(String),
}

pub type AssetRequestId = u64;

/// Outcome of one load request
#[derive(Debug, Clone, PartialEq)]
pub struct AssetResult {
    pub request: AssetRequestId,
    pub outcome: Result<AudioBufferId, AssetError>,
}

/// Completion callback handed to a loader with every request
///
/// Consumed on use, so a request resolves at most once.
pub struct AssetCompletion {
    request: AssetRequestId,
    producer: Arc<Mutex<AssetProducer>>,
}

impl AssetCompletion {
    pub fn request(&self) -> AssetRequestId {
        self.request
    }

    pub fn complete(self, outcome: Result<AudioBufferId, AssetError>) {
        let result = AssetResult {
            request: self.request,
            outcome,
        };
        match self.producer.lock() {
            Ok(mut producer) => {
                if producer.try_push(result).is_err() {
                    tracing::warn!(request = self.request, "asset completion queue full, result dropped");
                }
            }
            Err(_) => tracing::warn!(request = self.request, "asset completion queue poisoned"),
        }
    }

    pub fn succeed(self, buffer: AudioBufferId) {
        self.complete(Ok(buffer));
    }

    pub fn fail(self, error: AssetError) {
        self.complete(Err(error));
    }
}

/// Host-side asset loader (file system, network, decoder, ...)
pub trait AssetLoader: Send {
    /// Start loading `resource`; resolve `completion` when done
    fn load(&mut self, resource: &str, completion: AssetCompletion);
}

/// Request issuer paired with the queue its completions arrive on
pub struct AssetRequests {
    loader: Box<dyn AssetLoader>,
    producer: Arc<Mutex<AssetProducer>>,
    consumer: AssetConsumer,
    next_request: AssetRequestId,
}

impl AssetRequests {
    /// Completions in flight at once; requests are issued one at a time in practice
    pub const QUEUE_CAPACITY: usize = 16;

    pub fn new(loader: Box<dyn AssetLoader>) -> Self {
        let (producer, consumer) = create_asset_channel(Self::QUEUE_CAPACITY);
        Self {
            loader,
            producer: Arc::new(Mutex::new(producer)),
            consumer,
            next_request: 1,
        }
    }

    pub fn request(&mut self, resource: &str) -> AssetRequestId {
        let request = self.next_request;
        self.next_request += 1;

        let completion = AssetCompletion {
            request,
            producer: Arc::clone(&self.producer),
        };
        self.loader.load(resource, completion);
        request
    }

    /// Next completed request, if any
    pub fn poll(&mut self) -> Option<AssetResult> {
        self.consumer.try_pop()
    }
}

/// Loader over buffers the host has already decoded, answering synchronously
#[derive(Debug, Clone, Default)]
pub struct InMemoryLoader {
    assets: HashMap<String, AudioBufferId>,
}

impl InMemoryLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_asset(mut self, resource: impl Into<String>, buffer: AudioBufferId) -> Self {
        self.assets.insert(resource.into(), buffer);
        self
    }
}

impl AssetLoader for InMemoryLoader {
    fn load(&mut self, resource: &str, completion: AssetCompletion) {
        match self.assets.get(resource) {
            Some(buffer) => completion.succeed(*buffer),
            None => completion.fail(AssetError::NotFound(resource.to_string())),
        }
    }
}
