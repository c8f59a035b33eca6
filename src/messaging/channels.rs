// Lock-free channel carrying asset load completions back to the requester

use crate::audio::assets::AssetResult;
use ringbuf::{HeapRb, traits::Split};

pub type AssetProducer = ringbuf::HeapProd<AssetResult>;
pub type AssetConsumer = ringbuf::HeapCons<AssetResult>;

pub fn create_asset_channel(capacity: usize) -> (AssetProducer, AssetConsumer) {
    let rb = HeapRb::<AssetResult>::new(capacity);
    rb.split()
}
