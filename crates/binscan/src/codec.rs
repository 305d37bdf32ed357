//! Bridge to external decompression codecs
//!
//! The engine never decompresses anything itself. Encoded sections name a
//! [`DecoderFactory`]; the [`DecodeCache`] runs the decoder once per distinct
//! encoded region and hands the decoded bytes back as a fresh [`Input`] that
//! can be scanned like any other.

use crate::input::Input;
use ahash::AHashMap;
use binscan_utils::AnyResult;
use log::{debug, trace};
use parking_lot::Mutex;
use std::{
    fmt,
    io::{Read, Write},
    sync::Arc,
};

/// A streaming decompressor. Implementations live outside this crate, behind
/// whatever codec library they wrap, so errors travel as [`AnyResult`].
pub trait Decoder: Send {
    /// Decodes the stream starting at `pos` of `src` into `sink`, returning
    /// the number of decoded bytes produced.
    fn decode(&mut self, src: &Input, pos: u64, sink: &mut dyn Write) -> AnyResult<u64>;

    /// Encoded bytes consumed by the last [`Decoder::decode`] call.
    fn total_in(&self) -> u64;
}

/// Named constructor for [`Decoder`] instances. The name doubles as the
/// decoder's identity in cache keys, so two factories with the same name must
/// decode identically.
#[derive(Clone)]
pub struct DecoderFactory {
    name: String,
    make: Arc<dyn Fn() -> Box<dyn Decoder> + Send + Sync>,
}

impl DecoderFactory {
    pub fn new(
        name: impl Into<String>,
        make: impl Fn() -> Box<dyn Decoder> + Send + Sync + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            make: Arc::new(make),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn instantiate(&self) -> Box<dyn Decoder> {
        (self.make)()
    }
}

impl fmt::Debug for DecoderFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DecoderFactory")
            .field("name", &self.name)
            .finish()
    }
}

/// Opens the byte stream behind an embedded media reference for a renderer.
pub trait StreamHandler: Send + Sync {
    fn open(&self) -> AnyResult<Box<dyn Read + Send>>;
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CacheKey {
    path: String,
    pos: u64,
    decoder: String,
}

#[derive(Clone)]
struct CacheEntry {
    input: Input,
    total_in: u64,
}

/// Shared store of decoded inputs, keyed by encoded region and decoder
/// identity.
///
/// A decode runs under the table lock, which is what bounds each key to at
/// most one running decode; replays during render get the stored handle back
/// without touching the decoder again.
#[derive(Default)]
pub struct DecodeCache {
    entries: Mutex<AHashMap<CacheKey, CacheEntry>>,
}

impl DecodeCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the decoded input for the encoded region at `pos` of `parent`,
    /// running `factory`'s decoder on a cache miss. Also reports how many
    /// encoded bytes the decode consumed.
    pub fn decode_input(
        &self,
        parent: &Input,
        pos: u64,
        factory: &DecoderFactory,
        decoded_path: &str,
    ) -> AnyResult<(Input, u64)> {
        let key = CacheKey {
            path: parent.path().to_owned(),
            pos,
            decoder: factory.name().to_owned(),
        };

        let mut entries = self.entries.lock();
        if let Some(entry) = entries.get(&key) {
            trace!(
                "decode cache hit for {}:{pos} via {}",
                parent.path(),
                factory.name()
            );
            return Ok((entry.input.clone(), entry.total_in));
        }

        let mut decoder = factory.instantiate();
        let mut sink = Vec::new();
        let decoded = decoder.decode(parent, pos, &mut sink)?;
        let total_in = decoder.total_in();
        debug!(
            "decoded {decoded} bytes out of {total_in} encoded at {}:{pos} via {}",
            parent.path(),
            factory.name()
        );

        let input = Input::from_bytes(decoded_path, parent.order(), sink);
        entries.insert(
            key,
            CacheEntry {
                input: input.clone(),
                total_in,
            },
        );
        Ok((input, total_in))
    }
}

impl fmt::Debug for DecodeCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DecodeCache")
            .field("entries", &self.entries.lock().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::{DecodeCache, Decoder, DecoderFactory};
    use crate::input::{Endian, Input};
    use binscan_utils::AnyResult;
    use std::{
        io::Write,
        sync::atomic::{AtomicUsize, Ordering},
        sync::Arc,
    };

    /// Doubles every byte it reads, consuming the whole remaining input.
    struct Doubler {
        total_in: u64,
    }

    impl Decoder for Doubler {
        fn decode(&mut self, src: &Input, pos: u64, sink: &mut dyn Write) -> AnyResult<u64> {
            let encoded = src.read_exact_at(pos, (src.len() - pos) as usize)?;
            for byte in &encoded {
                sink.write_all(&[*byte, *byte])?;
            }
            self.total_in = encoded.len() as u64;
            Ok(self.total_in * 2)
        }

        fn total_in(&self) -> u64 {
            self.total_in
        }
    }

    #[test]
    fn decode_runs_once_per_region() {
        let constructed = Arc::new(AtomicUsize::new(0));
        let factory = {
            let constructed = constructed.clone();
            DecoderFactory::new("doubler", move || {
                constructed.fetch_add(1, Ordering::SeqCst);
                Box::new(Doubler { total_in: 0 })
            })
        };

        let cache = DecodeCache::new();
        let parent = Input::from_bytes("outer.bin", Endian::Little, vec![1, 2, 3]);

        let (first, total_in) = cache.decode_input(&parent, 1, &factory, "decoded").unwrap();
        assert_eq!(total_in, 2);
        assert_eq!(first.read_exact_at(0, 4).unwrap(), vec![2, 2, 3, 3]);

        let (second, _) = cache.decode_input(&parent, 1, &factory, "decoded").unwrap();
        assert!(Input::ptr_eq(&first, &second));
        assert_eq!(constructed.load(Ordering::SeqCst), 1);

        // A different position is a different region
        cache.decode_input(&parent, 0, &factory, "decoded").unwrap();
        assert_eq!(constructed.load(Ordering::SeqCst), 2);
    }
}
