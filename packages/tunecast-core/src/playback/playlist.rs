//! Songs, the playlist store seam, and the index policies both backends share.

use std::path::{Path, PathBuf};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

/// Where a song's bytes live.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Source {
    /// Directory song paths are relative to for local playback and for the
    /// static file server.
    pub local_root: Option<PathBuf>,

    /// Base URL renderers can fetch song paths from directly. When absent,
    /// renderers are pointed at the static file server.
    pub remote_base_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Song {
    pub title: String,
    pub artist: String,
    /// Storage path, relative to the source.
    pub path: String,
    pub source: Source,
}

impl Song {
    /// Returns the file path used for local playback.
    pub fn local_path(&self) -> PathBuf {
        match &self.source.local_root {
            Some(root) => root.join(&self.path),
            None => PathBuf::from(&self.path),
        }
    }
}

/// Ordered songs plus the persisted "current song" index.
///
/// Implemented by whatever owns the user's library; the router writes the
/// index through so it survives a backend switch.
pub trait PlaylistStore: Send + Sync {
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn song(&self, index: usize) -> Option<Song>;

    fn current_index(&self) -> Option<usize>;

    fn set_current_index(&self, index: Option<usize>);
}

/// Playlist held in memory.
#[derive(Debug, Default)]
pub struct InMemoryPlaylist {
    songs: Vec<Song>,
    current: RwLock<Option<usize>>,
}

impl InMemoryPlaylist {
    pub fn new(songs: Vec<Song>) -> Self {
        Self {
            songs,
            current: RwLock::new(None),
        }
    }

    /// Parses an M3U playlist. `#EXTINF:<secs>,<artist> - <title>` lines name
    /// the entry that follows; entries without one are titled after their
    /// file name.
    pub fn from_m3u(contents: &str, source: Source) -> Self {
        let mut songs = Vec::new();
        let mut pending: Option<(String, String)> = None;

        for line in contents.lines().map(str::trim) {
            if line.is_empty() {
                continue;
            }
            if let Some(info) = line.strip_prefix("#EXTINF:") {
                let display = info.split_once(',').map_or("", |(_, rest)| rest.trim());
                pending = Some(match display.split_once(" - ") {
                    Some((artist, title)) => (artist.trim().to_string(), title.trim().to_string()),
                    None => (String::new(), display.to_string()),
                });
                continue;
            }
            if line.starts_with('#') {
                continue;
            }

            let path = line.replace('\\', "/");
            let (artist, title) = pending.take().unwrap_or_else(|| {
                let stem = Path::new(&path)
                    .file_stem()
                    .and_then(|s| s.to_str())
                    .unwrap_or(&path)
                    .to_string();
                (String::new(), stem)
            });

            songs.push(Song {
                title,
                artist,
                path,
                source: source.clone(),
            });
        }

        Self::new(songs)
    }

    /// Reads and parses an M3U file.
    pub fn load_m3u(path: &Path, source: Source) -> std::io::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Ok(Self::from_m3u(&contents, source))
    }

    pub fn songs(&self) -> &[Song] {
        &self.songs
    }
}

impl PlaylistStore for InMemoryPlaylist {
    fn len(&self) -> usize {
        self.songs.len()
    }

    fn song(&self, index: usize) -> Option<Song> {
        self.songs.get(index).cloned()
    }

    fn current_index(&self) -> Option<usize> {
        *self.current.read()
    }

    fn set_current_index(&self, index: Option<usize>) {
        *self.current.write() = index;
    }
}

/// Index after `current`, wrapping from the last song to the first.
/// `None` only for an empty playlist.
pub fn next_wrapping(current: Option<usize>, len: usize) -> Option<usize> {
    if len == 0 {
        return None;
    }
    Some(match current {
        Some(i) if i + 1 < len => i + 1,
        _ => 0,
    })
}

/// Index before `current`, wrapping from the first song to the last.
/// `None` only for an empty playlist.
pub fn previous_wrapping(current: Option<usize>, len: usize) -> Option<usize> {
    if len == 0 {
        return None;
    }
    Some(match current {
        Some(i) if i > 0 && i < len => i - 1,
        _ => len - 1,
    })
}

/// Index to continue with once the current song finished on its own.
///
/// The next song if there is one, else the first song when repeating a
/// non-empty playlist, else `None` (playback stops with no current song).
pub fn completion_advance(current: Option<usize>, len: usize, repeat: bool) -> Option<usize> {
    let next = current.map_or(0, |i| i + 1);
    if next < len {
        Some(next)
    } else if repeat && len > 0 {
        Some(0)
    } else {
        None
    }
}

#[cfg(test)]
pub(crate) fn test_playlist(count: usize) -> InMemoryPlaylist {
    InMemoryPlaylist::new(
        (0..count)
            .map(|i| Song {
                title: format!("Song {}", i),
                artist: "Artist".to_string(),
                path: format!("song{}.mp3", i),
                source: Source::default(),
            })
            .collect(),
    )
}
