//! Module for the cost-bounded in-memory caches

use std::{
	collections::{
		HashMap,
		VecDeque,
	},
	hash::Hash,
	path::{
		Path,
		PathBuf,
	},
	sync::{
		Arc,
		Mutex,
		MutexGuard,
		PoisonError,
	},
};

use super::media_kind::MediaKind;

/// Bytes per pixel of a decoded [Thumbnail] (RGBA8)
pub const BYTES_PER_PIXEL: usize = 4;

/// Which entry gets evicted first when a [MemoryCache] is full
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvictionPolicy {
	/// Evict the earliest inserted entry, lookups dont change the order
	Fifo,
	/// Evict the least recently inserted or looked-up entry
	Lru,
}

/// A stored value with its cost
#[derive(Debug)]
struct CacheEntry<V> {
	value: V,
	cost:  usize,
}

/// The lock-guarded state of a [MemoryCache]
#[derive(Debug)]
struct CacheInner<K, V> {
	entries:      HashMap<K, CacheEntry<V>>,
	/// Keys in eviction order, front is evicted first
	order:        VecDeque<K>,
	current_size: usize,
}

impl<K, V> CacheInner<K, V>
where
	K: Eq + Hash + Clone,
{
	/// Remove `key` from the entries and the order, returning its cost
	fn remove(&mut self, key: &K) -> Option<CacheEntry<V>> {
		let entry = self.entries.remove(key)?;
		if let Some(pos) = self.order.iter().position(|v| return v == key) {
			self.order.remove(pos);
		}
		self.current_size -= entry.cost;

		return Some(entry);
	}

	/// Move `key` to the back of the eviction order
	fn touch(&mut self, key: &K) {
		if let Some(pos) = self.order.iter().position(|v| return v == key) {
			if let Some(moved) = self.order.remove(pos) {
				self.order.push_back(moved);
			}
		}
	}
}

/// Key-Value cache whose summed entry cost never exceeds a maximum
///
/// All operations lock the cache for the duration of the call only.
#[derive(Debug)]
pub struct MemoryCache<K, V> {
	/// Name used in logs
	name:     &'static str,
	max_size: usize,
	policy:   EvictionPolicy,
	inner:    Mutex<CacheInner<K, V>>,
}

impl<K, V> MemoryCache<K, V>
where
	K: Eq + Hash + Clone,
	V: Clone,
{
	/// Create a new empty cache that holds at most `max_size` cost
	#[must_use]
	pub fn new(name: &'static str, max_size: usize, policy: EvictionPolicy) -> Self {
		return Self {
			name,
			max_size,
			policy,
			inner: Mutex::new(CacheInner {
				entries:      HashMap::new(),
				order:        VecDeque::new(),
				current_size: 0,
			}),
		};
	}

	/// Lock the inner state
	/// A poisoned lock is recovered, because every operation leaves the state consistent before anything can panic
	fn lock(&self) -> MutexGuard<'_, CacheInner<K, V>> {
		return self.inner.lock().unwrap_or_else(PoisonError::into_inner);
	}

	/// Insert `value` under `key` with the given `cost`
	///
	/// Entries whose cost is higher than the maximum size are rejected, in which case `false` is returned.
	/// Otherwise entries are evicted until the new entry fits.
	pub fn insert(&self, key: K, value: V, cost: usize) -> bool {
		if cost > self.max_size {
			trace!(
				"Cache \"{}\": rejecting entry with cost {} (max {})",
				self.name, cost, self.max_size
			);
			return false;
		}

		let mut inner = self.lock();

		// replacing a key should not count its old cost
		inner.remove(&key);

		while inner.current_size + cost > self.max_size {
			let Some(oldest) = inner.order.pop_front() else {
				break;
			};
			if let Some(evicted) = inner.entries.remove(&oldest) {
				inner.current_size -= evicted.cost;
			}
		}

		inner.order.push_back(key.clone());
		inner.entries.insert(key, CacheEntry { value, cost });
		inner.current_size += cost;

		return true;
	}

	/// Get a clone of the value stored under `key`
	pub fn get(&self, key: &K) -> Option<V> {
		let mut inner = self.lock();
		let value = inner.entries.get(key).map(|v| return v.value.clone())?;

		if self.policy == EvictionPolicy::Lru {
			inner.touch(key);
		}

		return Some(value);
	}

	/// Get if `key` is stored, without changing the eviction order
	pub fn contains_key(&self, key: &K) -> bool {
		return self.lock().entries.contains_key(key);
	}

	/// Remove `key` from the cache, returning the value if it existed
	pub fn remove(&self, key: &K) -> Option<V> {
		return self.lock().remove(key).map(|v| return v.value);
	}

	/// Remove all entries
	pub fn clear(&self) {
		let mut inner = self.lock();
		inner.entries.clear();
		inner.order.clear();
		inner.current_size = 0;
	}

	/// Get the summed cost of all entries
	pub fn current_size(&self) -> usize {
		return self.lock().current_size;
	}

	/// Get the maximum summed cost
	pub fn max_size(&self) -> usize {
		return self.max_size;
	}

	/// Get the number of entries
	pub fn len(&self) -> usize {
		return self.lock().entries.len();
	}

	/// Get if there are no entries
	pub fn is_empty(&self) -> bool {
		return self.lock().entries.is_empty();
	}
}

/// A decoded thumbnail image (RGBA8)
#[derive(Clone, PartialEq, Eq)]
pub struct Thumbnail {
	width:  u32,
	height: u32,
	pixels: Vec<u8>,
}

impl Thumbnail {
	/// Decode the image at `path`
	pub fn load(path: &Path) -> Result<Self, crate::Error> {
		let decoded = image::open(path)?.to_rgba8();

		return Ok(Self {
			width:  decoded.width(),
			height: decoded.height(),
			pixels: decoded.into_raw(),
		});
	}

	/// Get the width in pixels
	pub fn width(&self) -> u32 {
		return self.width;
	}

	/// Get the height in pixels
	pub fn height(&self) -> u32 {
		return self.height;
	}

	/// Get the raw RGBA8 pixels, row by row
	pub fn pixels(&self) -> &[u8] {
		return &self.pixels;
	}

	/// Get the memory cost of this thumbnail for a [MemoryCache]
	pub fn cost(&self) -> usize {
		return self.width as usize * self.height as usize * BYTES_PER_PIXEL;
	}
}

// dont print all pixels
impl std::fmt::Debug for Thumbnail {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		return f
			.debug_struct("Thumbnail")
			.field("width", &self.width)
			.field("height", &self.height)
			.finish_non_exhaustive();
	}
}

/// Cache of decoded thumbnails, keyed by the media source path
pub type ThumbnailCache = MemoryCache<PathBuf, Arc<Thumbnail>>;
/// Cache of the last computed listing (like a sort or search result), keyed by the query
pub type ResultCache = MemoryCache<String, Arc<Vec<PathBuf>>>;

/// Estimate the memory cost of a listing for a [ResultCache]
pub fn result_cost(result: &[PathBuf]) -> usize {
	return result
		.iter()
		.map(|v| return v.as_os_str().len() + std::mem::size_of::<PathBuf>())
		.sum();
}

/// Maximum sizes for all caches in [Caches]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheSizes {
	/// Maximum bytes of decoded video thumbnails
	pub video:   usize,
	/// Maximum bytes of decoded music thumbnails
	pub music:   usize,
	/// Maximum bytes of thumbnails currently displayed
	pub display: usize,
	/// Maximum estimated bytes of sort and search results, each
	pub results: usize,
}

impl Default for CacheSizes {
	fn default() -> Self {
		return Self {
			video:   100 * 1024 * 1024,
			music:   50 * 1024 * 1024,
			display: 50 * 1024 * 1024,
			results: 10 * 1024 * 1024,
		};
	}
}

/// All caches of the application, there should only be one instance that gets shared
#[derive(Debug)]
pub struct Caches {
	/// Decoded video thumbnails
	pub video:   Arc<ThumbnailCache>,
	/// Decoded music thumbnails
	pub music:   Arc<ThumbnailCache>,
	/// Thumbnails that are currently displayed, least-recently-used are evicted first
	pub display: Arc<ThumbnailCache>,
	/// Last sort results
	pub sort:    Arc<ResultCache>,
	/// Last search results
	pub search:  Arc<ResultCache>,
}

impl Caches {
	/// Create all caches with the given sizes
	#[must_use]
	pub fn new(sizes: CacheSizes) -> Arc<Self> {
		return Arc::new(Self {
			video:   Arc::new(MemoryCache::new("video", sizes.video, EvictionPolicy::Fifo)),
			music:   Arc::new(MemoryCache::new("music", sizes.music, EvictionPolicy::Fifo)),
			display: Arc::new(MemoryCache::new("display", sizes.display, EvictionPolicy::Lru)),
			sort:    Arc::new(MemoryCache::new("sort", sizes.results, EvictionPolicy::Fifo)),
			search:  Arc::new(MemoryCache::new("search", sizes.results, EvictionPolicy::Fifo)),
		});
	}

	/// Get the thumbnail cache for `kind`
	pub fn thumbnails(&self, kind: MediaKind) -> &Arc<ThumbnailCache> {
		return match kind {
			MediaKind::Video => &self.video,
			MediaKind::Music => &self.music,
		};
	}

	/// Clear every cache
	pub fn clear_all(&self) {
		self.video.clear();
		self.music.clear();
		self.display.clear();
		self.sort.clear();
		self.search.clear();
	}
}

#[cfg(test)]
mod test {
	use super::*;

	fn cache(max: usize) -> MemoryCache<String, u32> {
		return MemoryCache::new("test", max, EvictionPolicy::Fifo);
	}

	/// Get all keys in eviction order
	fn keys_of(cache: &MemoryCache<String, u32>) -> Vec<String> {
		return cache.lock().order.iter().cloned().collect();
	}

	mod fifo {
		use super::*;

		#[test]
		fn test_insert_and_get() {
			let cache = cache(100);

			assert!(cache.insert("a".to_owned(), 1, 10));
			assert_eq!(Some(1), cache.get(&"a".to_owned()));
			assert_eq!(None, cache.get(&"b".to_owned()));
			assert_eq!(10, cache.current_size());
		}

		#[test]
		fn test_evicts_oldest() {
			let cache = cache(30);

			cache.insert("a".to_owned(), 1, 10);
			cache.insert("b".to_owned(), 2, 10);
			cache.insert("c".to_owned(), 3, 10);
			// lookups dont matter for fifo
			cache.get(&"a".to_owned());
			cache.insert("d".to_owned(), 4, 15);

			assert_eq!(vec!["c".to_owned(), "d".to_owned()], keys_of(&cache));
			assert_eq!(25, cache.current_size());
		}

		#[test]
		fn test_reject_too_large() {
			let cache = cache(30);
			cache.insert("a".to_owned(), 1, 10);

			assert!(!cache.insert("huge".to_owned(), 2, 31));

			assert_eq!(vec!["a".to_owned()], keys_of(&cache));
			assert_eq!(10, cache.current_size());
		}

		#[test]
		fn test_replace_existing_key() {
			let cache = cache(30);

			cache.insert("a".to_owned(), 1, 10);
			cache.insert("b".to_owned(), 2, 10);
			cache.insert("a".to_owned(), 3, 20);

			assert_eq!(Some(3), cache.get(&"a".to_owned()));
			assert_eq!(30, cache.current_size());
			assert_eq!(2, cache.len());
		}

		#[test]
		fn test_exact_fit() {
			let cache = cache(30);

			assert!(cache.insert("a".to_owned(), 1, 30));
			assert_eq!(30, cache.current_size());
		}

		#[test]
		fn test_clear() {
			let cache = cache(30);
			cache.insert("a".to_owned(), 1, 10);
			cache.insert("b".to_owned(), 2, 10);

			cache.clear();

			assert!(cache.is_empty());
			assert_eq!(0, cache.current_size());
			assert_eq!(None, cache.get(&"a".to_owned()));
		}

		#[test]
		fn test_remove() {
			let cache = cache(30);
			cache.insert("a".to_owned(), 1, 10);

			assert_eq!(Some(1), cache.remove(&"a".to_owned()));
			assert_eq!(None, cache.remove(&"a".to_owned()));
			assert_eq!(0, cache.current_size());
		}

		#[test]
		fn test_size_invariant() {
			let cache = cache(100);
			// deterministic pseudo-random costs
			let mut cost: usize = 7;

			for i in 0..500u32 {
				cost = (cost * 31 + 11) % 120;
				cache.insert(format!("key{}", i % 37), i, cost);

				// single guard, the mutex is not reentrant
				let inner = cache.lock();
				let summed: usize = inner.entries.values().map(|v| return v.cost).sum();
				assert!(inner.current_size <= cache.max_size());
				assert_eq!(summed, inner.current_size);
				assert_eq!(inner.entries.len(), inner.order.len());
				drop(inner);
			}
		}
	}

	mod lru {
		use super::*;

		#[test]
		fn test_get_refreshes() {
			let cache: MemoryCache<String, u32> = MemoryCache::new("test", 30, EvictionPolicy::Lru);

			cache.insert("a".to_owned(), 1, 10);
			cache.insert("b".to_owned(), 2, 10);
			cache.insert("c".to_owned(), 3, 10);
			cache.get(&"a".to_owned());
			cache.insert("d".to_owned(), 4, 10);

			assert!(cache.contains_key(&"a".to_owned()));
			assert!(!cache.contains_key(&"b".to_owned()));
		}
	}

	mod caches {
		use super::*;

		#[test]
		fn test_thumbnails_by_kind() {
			let caches = Caches::new(CacheSizes::default());

			assert!(Arc::ptr_eq(&caches.video, caches.thumbnails(MediaKind::Video)));
			assert!(Arc::ptr_eq(&caches.music, caches.thumbnails(MediaKind::Music)));
		}

		#[test]
		fn test_clear_all() {
			let caches = Caches::new(CacheSizes::default());
			let listing = Arc::new(vec![PathBuf::from("/a"), PathBuf::from("/b")]);
			let cost = result_cost(&listing);

			caches.sort.insert("name".to_owned(), listing.clone(), cost);
			caches.search.insert("query".to_owned(), listing, cost);

			caches.clear_all();

			assert!(caches.sort.is_empty());
			assert!(caches.search.is_empty());
		}

		#[test]
		fn test_thumbnail_cost() {
			let dir = tempfile::Builder::new()
				.prefix("mediathumb-test-cost-")
				.tempdir()
				.expect("Expected a temp dir to be created");
			let path = dir.path().join("thumb.jpg");
			image::RgbImage::new(32, 18)
				.save(&path)
				.expect("Expected image to be saved");

			let thumbnail = Thumbnail::load(&path).expect("Expected image to be decoded");

			assert_eq!(32, thumbnail.width());
			assert_eq!(18, thumbnail.height());
			assert_eq!(32 * 18 * 4, thumbnail.cost());
			assert_eq!(thumbnail.cost(), thumbnail.pixels().len());
		}
	}
}
