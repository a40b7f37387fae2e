use crate::error::SplatError;
use crate::structures::SplatSet;
use crate::decode;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{info, warn};

/// Identifies one load request. Only the newest ticket may publish a scene.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoadTicket {
    generation: u64,
}

impl LoadTicket {
    #[inline]
    pub fn generation(&self) -> u64 {
        self.generation
    }
}

/// Turns fetched bytes into a [`SplatSet`], discarding results of loads that
/// were overtaken by a newer request.
#[derive(Debug, Default)]
pub struct SceneLoader {
    generation: AtomicU64,
}

impl SceneLoader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts a load and invalidates every earlier ticket.
    pub fn begin(&self) -> LoadTicket {
        let generation = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
        LoadTicket { generation }
    }

    #[inline]
    pub fn is_current(&self, ticket: &LoadTicket) -> bool {
        self.generation.load(Ordering::Acquire) == ticket.generation
    }

    fn check_current(&self, ticket: &LoadTicket) -> Result<(), SplatError> {
        if self.is_current(ticket) {
            Ok(())
        } else {
            warn!(generation = ticket.generation, "Dropping superseded load");
            Err(SplatError::Superseded)
        }
    }

    /// Decodes the raw `.splat` bytes fetched for `ticket`. Archives must be
    /// unpacked by the caller.
    pub fn finish(&self, ticket: &LoadTicket, bytes: &[u8]) -> Result<SplatSet, SplatError> {
        self.check_current(ticket)?;
        let set = decode(bytes)?;
        info!(
            generation = ticket.generation,
            bytes = bytes.len(),
            splats = set.len(),
            "Scene loaded"
        );
        Ok(set)
    }

    pub fn load_path(&self, path: impl AsRef<Path>) -> Result<SplatSet, SplatError> {
        let path = path.as_ref();
        let ticket = self.begin();
        let bytes = std::fs::read(path)
            .map_err(|e| SplatError::Load(format!("{}: {}", path.display(), e)))?;
        self.finish(&ticket, &bytes)
    }
}

cfg_if::cfg_if! {
if #[cfg(feature = "async")] {
    use std::fmt::Display;
    use std::future::Future;

    impl SceneLoader {
        /// Runs `fetch` as the byte source of a new load. The result is
        /// dropped if another load began while this one was suspended.
        pub async fn load_with<F, E>(&self, fetch: F) -> Result<SplatSet, SplatError>
        where
            F: Future<Output = Result<Vec<u8>, E>>,
            E: Display,
        {
            let ticket = self.begin();
            let bytes = fetch
                .await
                .map_err(|e| SplatError::Load(e.to_string()))?;
            self.finish(&ticket, &bytes)
        }

        pub async fn load_path_async(
            &self,
            path: impl AsRef<Path>,
        ) -> Result<SplatSet, SplatError> {
            let path = path.as_ref().to_path_buf();
            let display = path.display().to_string();
            self.load_with(async move {
                tokio::fs::read(&path)
                    .await
                    .map_err(|e| format!("{}: {}", display, e))
            })
            .await
        }
    }
}
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::structures::{RawSplat, Splat};
    use zerocopy::IntoBytes;

    fn one_splat_bytes() -> Vec<u8> {
        RawSplat::from(&Splat {
            position: [1.0, 2.0, 3.0],
            color: [1.0, 1.0, 1.0, 1.0],
            ..Default::default()
        })
        .as_bytes()
        .to_vec()
    }

    #[test]
    fn newer_ticket_supersedes_older() {
        let loader = SceneLoader::new();
        let first = loader.begin();
        let second = loader.begin();
        assert!(!loader.is_current(&first));
        assert!(loader.is_current(&second));
        assert_eq!(second.generation(), first.generation() + 1);

        assert!(matches!(
            loader.finish(&first, &one_splat_bytes()),
            Err(SplatError::Superseded)
        ));
        let set = loader.finish(&second, &one_splat_bytes()).expect("current load");
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn missing_file_is_a_load_error() {
        let loader = SceneLoader::new();
        let err = loader
            .load_path("definitely/not/here.splat")
            .expect_err("missing file");
        assert!(matches!(err, SplatError::Load(msg) if msg.contains("here.splat")));
    }

    #[cfg(feature = "async")]
    #[tokio::test]
    async fn async_fetch_failure_is_terminal() {
        let loader = SceneLoader::new();
        let result = loader
            .load_with(async { Err::<Vec<u8>, _>("connection reset") })
            .await;
        assert!(matches!(result, Err(SplatError::Load(msg)) if msg == "connection reset"));
    }

    #[cfg(feature = "async")]
    #[tokio::test]
    async fn in_flight_load_is_superseded() {
        let loader = SceneLoader::new();
        let (tx, rx) = tokio::sync::oneshot::channel::<Vec<u8>>();

        let slow = loader.load_with(async move { rx.await.map_err(|e| e.to_string()) });
        let fast = async {
            let set = loader
                .load_with(async { Ok::<_, String>(one_splat_bytes()) })
                .await;
            let _ = tx.send(one_splat_bytes());
            set
        };
        let (slow, fast) = tokio::join!(slow, fast);

        assert!(matches!(slow, Err(SplatError::Superseded)));
        assert_eq!(fast.expect("newest load wins").len(), 1);
    }

    #[cfg(feature = "async")]
    #[tokio::test]
    async fn async_load_does_not_unpack_archives() {
        let packed = crate::pack(&one_splat_bytes(), crate::PackOptions::default()).expect("pack");
        let loader = SceneLoader::new();
        let set = loader
            .load_with(async { Ok::<_, String>(packed.clone()) })
            .await
            .expect("bytes are decoded as records");
        assert_eq!(set.len(), packed.len() / crate::SPLAT_RECORD_SIZE);
    }
}
