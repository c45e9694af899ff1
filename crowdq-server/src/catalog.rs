//! Music catalog seam
//!
//! Search is delegated wholesale to a [`MusicCatalog`]. The voting core does
//! no caching or ranking of results.

use async_trait::async_trait;

use crowdq_common::{Result, SimpleSong};

/// Music search backend
#[async_trait]
pub trait MusicCatalog: Send + Sync {
    /// Catalog identifier used in logs (e.g., "static")
    fn source_id(&self) -> &'static str;

    /// Songs matching `query`, in the backend's own order
    async fn search(&self, query: &str) -> Result<Vec<SimpleSong>>;
}

/// Fixed in-memory catalog
///
/// Matches the query case-insensitively against title and artist and returns
/// hits in catalog order.
#[derive(Debug, Clone, Default)]
pub struct StaticCatalog {
    songs: Vec<SimpleSong>,
}

impl StaticCatalog {
    pub fn new(songs: Vec<SimpleSong>) -> Self {
        Self { songs }
    }

    /// Small catalog for local runs
    pub fn demo() -> Self {
        let song = |id: &str, title: &str, artist: &str| SimpleSong {
            id: id.to_string(),
            title: title.to_string(),
            artist: artist.to_string(),
            image: format!("https://images.example.com/{}.jpg", id),
        };

        Self::new(vec![
            song("4uLU6hMCjMI75M1A2tKUQC", "The Jackie", "Harbor Lights"),
            song("0VjIjW4GlUZAMYd2vXMi3b", "Blinding Static", "The Weekend Drive"),
            song("7qiZfU4dY1lWllzX7mPBI3", "Shape of Rain", "Ed Sheeran Tribute Band"),
            song("3n3Ppam7vgaVa1iaRUc9Lp", "Mr. Brightside Story", "The Killers Cover Club"),
            song("2takcwOaAZWiXQijPHIx7B", "Time Machine", "Jackie and the Dials"),
            song("1301WleyT98MSxVHPZCA6M", "Flowers in June", "Miley Rivers"),
        ])
    }
}

#[async_trait]
impl MusicCatalog for StaticCatalog {
    fn source_id(&self) -> &'static str {
        "static"
    }

    async fn search(&self, query: &str) -> Result<Vec<SimpleSong>> {
        let needle = query.trim().to_lowercase();
        Ok(self
            .songs
            .iter()
            .filter(|song| {
                song.title.to_lowercase().contains(&needle)
                    || song.artist.to_lowercase().contains(&needle)
            })
            .cloned()
            .collect())
    }
}
