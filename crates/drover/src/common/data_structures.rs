use fxhash::FxBuildHasher;

/// Hash map used across the crate.
/// Keys are small ids or short strings, so a fast non-cryptographic hasher
/// wins over the default SipHash.
pub type Map<K, V> = hashbrown::HashMap<K, V, FxBuildHasher>;

/// Hash set counterpart of [`Map`].
pub type Set<T> = hashbrown::HashSet<T, FxBuildHasher>;
