use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::Path;
use thiserror::Error;

/// Sled cache size. The workload is write-heavy, so this is well above the
/// sled default.
const CACHE_CAPACITY: u64 = 64 * 1024 * 1024;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("key not found")]
    NotFound,
    #[error("database error: {0}")]
    Database(#[from] sled::Error),
    #[error("encode error: {0}")]
    Encode(#[from] rmp_serde::encode::Error),
    #[error("decode error: {0}")]
    Decode(#[from] rmp_serde::decode::Error),
}

/// Encode a record as a self-describing MessagePack map.
pub(crate) fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, StoreError> {
    Ok(rmp_serde::to_vec_named(value)?)
}

/// Decode a record previously written by [`encode`].
pub(crate) fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, StoreError> {
    Ok(rmp_serde::from_slice(bytes)?)
}

/// Thin typed layer over sled: structured records under byte keys.
///
/// Writes are individually atomic; there are no multi-key transactions.
#[derive(Debug, Clone)]
pub struct ObjDb {
    db: sled::Db,
}

impl ObjDb {
    /// Open (or create) the store at `path`.
    ///
    /// A corruption error at open time triggers one more open attempt, which
    /// lets sled truncate the damaged log tail, before the error surfaces.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let config = sled::Config::new()
            .path(path.as_ref())
            .cache_capacity(CACHE_CAPACITY)
            .mode(sled::Mode::HighThroughput);

        let db = match config.open() {
            Ok(db) => db,
            Err(sled::Error::Corruption { .. }) => {
                tracing::warn!("corrupted database at {:?}, recovering", path.as_ref());
                config.open()?
            }
            Err(e) => return Err(e.into()),
        };

        Ok(Self { db })
    }

    pub fn put_obj<T: Serialize>(&self, key: &[u8], value: &T) -> Result<(), StoreError> {
        let bytes = encode(value)?;
        self.db.insert(key, bytes)?;
        Ok(())
    }

    pub fn get_obj<T: DeserializeOwned>(&self, key: &[u8]) -> Result<T, StoreError> {
        match self.db.get(key)? {
            Some(bytes) => decode(&bytes),
            None => Err(StoreError::NotFound),
        }
    }

    /// Iterate decoded records under a key prefix.
    pub fn iter_prefix<T: DeserializeOwned>(
        &self,
        prefix: &[u8],
    ) -> impl Iterator<Item = Result<(Vec<u8>, T), StoreError>> + '_ {
        self.db.scan_prefix(prefix).map(|kv| {
            let (key, value) = kv?;
            Ok((key.to_vec(), decode(&value)?))
        })
    }

    pub fn flush(&self) -> Result<(), StoreError> {
        self.db.flush()?;
        Ok(())
    }

    /// The underlying sled handle, shared with the frontier.
    pub(crate) fn sled(&self) -> &sled::Db {
        &self.db
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::UrlInfo;
    use tempfile::TempDir;

    #[test]
    fn test_put_get_roundtrip() {
        let dir = TempDir::new().unwrap();
        let db = ObjDb::open(dir.path()).unwrap();

        let info = UrlInfo {
            url: "http://test.local/".to_string(),
            status_code: Some(200),
            crawled_at: Some(1_700_000_000),
            error: None,
        };
        db.put_obj(b"url/http://test.local/", &info).unwrap();

        let back: UrlInfo = db.get_obj(b"url/http://test.local/").unwrap();
        assert_eq!(back, info);
    }

    #[test]
    fn test_missing_key_is_not_found() {
        let dir = TempDir::new().unwrap();
        let db = ObjDb::open(dir.path()).unwrap();

        let err = db.get_obj::<UrlInfo>(b"url/absent").unwrap_err();
        assert!(matches!(err, StoreError::NotFound));
    }

    #[test]
    fn test_overwrite_is_atomic_update() {
        let dir = TempDir::new().unwrap();
        let db = ObjDb::open(dir.path()).unwrap();

        db.put_obj(b"k", &UrlInfo::default()).unwrap();
        let updated = UrlInfo {
            url: "http://test.local/".to_string(),
            status_code: Some(404),
            ..Default::default()
        };
        db.put_obj(b"k", &updated).unwrap();

        let back: UrlInfo = db.get_obj(b"k").unwrap();
        assert_eq!(back.status_code, Some(404));
    }

    #[test]
    fn test_persists_across_reopen() {
        let dir = TempDir::new().unwrap();
        {
            let db = ObjDb::open(dir.path()).unwrap();
            db.put_obj(b"k", &UrlInfo::default()).unwrap();
            db.flush().unwrap();
        }
        let db = ObjDb::open(dir.path()).unwrap();
        assert!(db.get_obj::<UrlInfo>(b"k").is_ok());
    }

    #[test]
    fn test_iter_prefix() {
        let dir = TempDir::new().unwrap();
        let db = ObjDb::open(dir.path()).unwrap();

        db.put_obj(b"url/a", &UrlInfo::default()).unwrap();
        db.put_obj(b"url/b", &UrlInfo::default()).unwrap();
        db.put_obj(b"other/c", &UrlInfo::default()).unwrap();

        let records: Vec<_> = db
            .iter_prefix::<UrlInfo>(b"url/")
            .collect::<Result<_, _>>()
            .unwrap();
        assert_eq!(records.len(), 2);
    }
}
