/// A buffer key: equality-comparable and deterministically encodable to
/// bytes. Equal keys must encode to equal bytes, since the encoding names
/// the file a persisted value lives in.
pub trait BufferKey: Clone + Eq + Send + 'static {
    /// Deterministic byte encoding of the key.
    fn to_bytes(&self) -> Vec<u8>;

    /// Filesystem-safe name for this key.
    fn file_name(&self) -> String {
        hex::encode(self.to_bytes())
    }

    /// Short name for log lines.
    fn debug_name(&self) -> String {
        let bytes = self.to_bytes();
        if bytes.len() <= 6 {
            hex::encode(bytes)
        } else {
            format!("{}..", hex::encode(&bytes[..6]))
        }
    }
}

impl BufferKey for Vec<u8> {
    fn to_bytes(&self) -> Vec<u8> {
        self.clone()
    }
}

impl<const N: usize> BufferKey for [u8; N] {
    fn to_bytes(&self) -> Vec<u8> {
        self.to_vec()
    }
}

impl BufferKey for String {
    fn to_bytes(&self) -> Vec<u8> {
        self.as_bytes().to_vec()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // A sum-type key, encoded by pattern matching so each variant gets a
    // distinct file name even when the payloads collide.
    #[derive(Clone, Debug, PartialEq, Eq)]
    enum ChunkName {
        Immutable([u8; 8]),
        Mutable([u8; 8]),
    }

    impl BufferKey for ChunkName {
        fn to_bytes(&self) -> Vec<u8> {
            match self {
                ChunkName::Immutable(id) => {
                    let mut bytes = vec![0x01];
                    bytes.extend_from_slice(id);
                    bytes
                }
                ChunkName::Mutable(id) => {
                    let mut bytes = vec![0x02];
                    bytes.extend_from_slice(id);
                    bytes
                }
            }
        }

        fn debug_name(&self) -> String {
            match self {
                ChunkName::Immutable(id) => format!("imm-{}", hex::encode(id)),
                ChunkName::Mutable(id) => format!("mut-{}", hex::encode(id)),
            }
        }
    }

    #[test]
    fn test_file_name_is_hex() {
        let key: Vec<u8> = vec![0xde, 0xad, 0xbe, 0xef];
        assert_eq!(key.file_name(), "deadbeef");
    }

    #[test]
    fn test_equal_keys_share_a_file_name() {
        let a: Vec<u8> = vec![1, 2, 3];
        let b: Vec<u8> = vec![1, 2, 3];
        assert_eq!(a.file_name(), b.file_name());

        let c = *b"abcdefgh";
        let d = c.to_vec();
        assert_eq!(c.file_name(), d.file_name());
    }

    #[test]
    fn test_debug_name_is_short() {
        let key: Vec<u8> = (0u8..32).collect();
        let name = key.debug_name();
        assert_eq!(name, "000102030405..");

        let short: Vec<u8> = vec![0xab];
        assert_eq!(short.debug_name(), "ab");
    }

    #[test]
    fn test_variant_keys_do_not_collide() {
        let id = [7u8; 8];
        let immutable = ChunkName::Immutable(id);
        let mutable = ChunkName::Mutable(id);
        assert_ne!(immutable.file_name(), mutable.file_name());
        assert_eq!(immutable.file_name(), ChunkName::Immutable(id).file_name());
        assert_eq!(immutable.debug_name(), "imm-0707070707070707");
    }
}
