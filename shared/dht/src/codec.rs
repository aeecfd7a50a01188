use std::{collections::BTreeMap, time::Duration};

use serde::{de::DeserializeOwned, Serialize};

use crate::{DistributedStore, StoreEntry, StoreError};

pub fn encode<T: Serialize>(key: &str, value: &T) -> Result<Vec<u8>, StoreError> {
    postcard::to_stdvec(value).map_err(|source| StoreError::Encode {
        key: key.to_string(),
        source,
    })
}

pub fn decode<T: DeserializeOwned>(key: &str, bytes: &[u8]) -> Result<T, StoreError> {
    postcard::from_bytes(bytes).map_err(|source| StoreError::Decode {
        key: key.to_string(),
        source,
    })
}

pub async fn store_value<T: Serialize + Sync>(
    store: &dyn DistributedStore,
    key: &str,
    subkey: Option<&str>,
    value: &T,
    lease: Duration,
) -> Result<(), StoreError> {
    let bytes = encode(key, value)?;
    store.store(key, subkey, bytes, lease).await
}

pub async fn get_value<T: DeserializeOwned>(
    store: &dyn DistributedStore,
    key: &str,
    latest: bool,
) -> Result<Option<T>, StoreError> {
    match store.get(key, latest).await? {
        None => Ok(None),
        Some(StoreEntry::Value(bytes)) => decode(key, &bytes).map(Some),
        Some(StoreEntry::Dictionary(_)) => Err(StoreError::UnexpectedShape {
            key: key.to_string(),
            expected: "single value",
        }),
    }
}

pub async fn get_dictionary<T: DeserializeOwned>(
    store: &dyn DistributedStore,
    key: &str,
    latest: bool,
) -> Result<Option<BTreeMap<String, T>>, StoreError> {
    match store.get(key, latest).await? {
        None => Ok(None),
        Some(StoreEntry::Dictionary(entries)) => entries
            .iter()
            .map(|(subkey, bytes)| Ok((subkey.clone(), decode(key, bytes)?)))
            .collect::<Result<BTreeMap<_, _>, StoreError>>()
            .map(Some),
        Some(StoreEntry::Value(_)) => Err(StoreError::UnexpectedShape {
            key: key.to_string(),
            expected: "dictionary",
        }),
    }
}
