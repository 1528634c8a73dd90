//! Cache-then-fetch lookups of Spotify entity metadata.

use log::{debug, info};
use serde::{Serialize, de::DeserializeOwned};

use crate::clients::{
    LocalStorage, MusicApi,
    entities::{Artist, EntityKind, Track},
    errors::{Error, Result},
    spotify::MAX_BATCH_ENTITY_COUNT,
};

/// Returns one item per id, in the order of `ids`.
///
/// Items already in the entity cache are served from it; the rest are fetched through `fetch` in
/// chunks of at most `MAX_BATCH_ENTITY_COUNT` ids and written back to the cache.
pub async fn fetch_with_cache<T, F, Fut>(
    storage: &LocalStorage,
    kind: EntityKind,
    ids: &[&str],
    id_of: fn(&T) -> &str,
    fetch: F,
) -> Result<Vec<T>>
where
    T: Serialize + DeserializeOwned,
    F: Fn(Vec<String>) -> Fut,
    Fut: Future<Output = Result<Vec<T>>>,
{
    // First, try to get as many items as we can from the cache
    debug!("Checking cache for {} {} ids ...", ids.len(), kind.as_str());
    let mut cached: Vec<Option<T>> = storage.get_cache_items(kind, ids).await?;

    let missing_ids: Vec<&str> = ids
        .iter()
        .zip(&cached)
        .filter(|(_, item)| item.is_none())
        .map(|(id, _)| *id)
        .collect();
    info!(
        "{}/{} {} items found in the cache.",
        ids.len() - missing_ids.len(),
        ids.len(),
        kind.as_str()
    );

    let mut fetched: Vec<T> = Vec::with_capacity(missing_ids.len());
    for (chunk_ix, chunk) in missing_ids.chunks(MAX_BATCH_ENTITY_COUNT).enumerate() {
        debug!("Fetching chunk {chunk_ix} ...");
        let items = fetch(chunk.iter().map(|id| (*id).to_string()).collect()).await?;

        // Spotify silently drops unknown ids, so match by id instead of position
        let pairs: Vec<(&str, &T)> = items.iter().map(|item| (id_of(item), item)).collect();
        storage.set_cache_items(kind, &pairs).await?;
        fetched.extend(items);
    }

    for item in fetched {
        if let Some(pos) = ids
            .iter()
            .zip(&cached)
            .position(|(id, slot)| slot.is_none() && *id == id_of(&item))
        {
            cached[pos] = Some(item);
        }
    }

    ids.iter()
        .zip(cached)
        .map(|(id, item)| {
            item.ok_or_else(|| Error::MissingEntity {
                kind: kind.as_str(),
                id: (*id).to_string(),
            })
        })
        .collect()
}

pub async fn fetch_artists<A: MusicApi + ?Sized>(
    storage: &LocalStorage,
    api: &A,
    ids: &[&str],
) -> Result<Vec<Artist>> {
    fetch_with_cache(
        storage,
        EntityKind::Artist,
        ids,
        |artist: &Artist| artist.id.as_str(),
        |chunk| async move {
            let refs: Vec<&str> = chunk.iter().map(String::as_str).collect();
            api.artists(&refs).await
        },
    )
    .await
}

pub async fn fetch_tracks<A: MusicApi + ?Sized>(
    storage: &LocalStorage,
    api: &A,
    ids: &[&str],
) -> Result<Vec<Track>> {
    fetch_with_cache(
        storage,
        EntityKind::Track,
        ids,
        |track: &Track| track.id.as_str(),
        |chunk| async move {
            let refs: Vec<&str> = chunk.iter().map(String::as_str).collect();
            api.tracks(&refs).await
        },
    )
    .await
}

/// Writes freshly fetched entities to the cache so later lookups don't hit Spotify.
pub async fn warm<T: Serialize>(
    storage: &LocalStorage,
    kind: EntityKind,
    items: &[T],
    id_of: fn(&T) -> &str,
) -> Result<()> {
    let pairs: Vec<(&str, &T)> = items.iter().map(|item| (id_of(item), item)).collect();
    storage.set_cache_items(kind, &pairs).await
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;

    fn artist(id: &str) -> Artist {
        Artist {
            id: id.into(),
            name: id.to_uppercase(),
            uri: format!("spotify:artist:{id}"),
            genres: vec![],
            images: vec![],
            popularity: 0,
            followers: 0,
        }
    }

    async fn storage() -> (tempfile::TempDir, LocalStorage) {
        let dir = tempfile::tempdir().unwrap();
        let storage = LocalStorage::open(&dir.path().join("cache.duckdb"))
            .await
            .unwrap();
        storage.init_db().await.unwrap();
        (dir, storage)
    }

    #[tokio::test]
    async fn merges_cached_and_fetched_in_order() {
        let (_dir, storage) = storage().await;
        warm(&storage, EntityKind::Artist, &[artist("b")], |a| a.id.as_str())
            .await
            .unwrap();

        let requested = Mutex::new(Vec::new());
        let items = fetch_with_cache(
            &storage,
            EntityKind::Artist,
            &["a", "b", "c"],
            |a: &Artist| a.id.as_str(),
            |chunk| {
                requested.lock().unwrap().push(chunk.clone());
                // Out of order on purpose
                async move { Ok(chunk.iter().rev().map(|id| artist(id)).collect()) }
            },
        )
        .await
        .unwrap();

        let ids: Vec<_> = items.iter().map(|a| a.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
        assert_eq!(
            *requested.lock().unwrap(),
            vec![vec!["a".to_string(), "c".to_string()]]
        );

        // Everything is cached now
        let again = fetch_with_cache(
            &storage,
            EntityKind::Artist,
            &["c", "a"],
            |a: &Artist| a.id.as_str(),
            |_chunk| async { Err(Error::MissingToken) },
        )
        .await
        .unwrap();
        assert_eq!(again[0].id, "c");
    }

    #[tokio::test]
    async fn chunks_missing_ids() {
        let (_dir, storage) = storage().await;
        let ids: Vec<String> = (0..120).map(|i| format!("id{i}")).collect();
        let refs: Vec<&str> = ids.iter().map(String::as_str).collect();

        let chunk_sizes = Mutex::new(Vec::new());
        let items = fetch_with_cache(
            &storage,
            EntityKind::Artist,
            &refs,
            |a: &Artist| a.id.as_str(),
            |chunk| {
                chunk_sizes.lock().unwrap().push(chunk.len());
                async move { Ok(chunk.iter().map(|id| artist(id)).collect()) }
            },
        )
        .await
        .unwrap();

        assert_eq!(items.len(), 120);
        assert_eq!(*chunk_sizes.lock().unwrap(), vec![50, 50, 20]);
    }

    #[tokio::test]
    async fn unknown_ids_are_errors() {
        let (_dir, storage) = storage().await;
        let err = fetch_with_cache(
            &storage,
            EntityKind::Artist,
            &["ghost"],
            |a: &Artist| a.id.as_str(),
            |_chunk| async { Ok(Vec::new()) },
        )
        .await
        .unwrap_err();
        assert!(matches!(err, Error::MissingEntity { .. }));
    }
}
