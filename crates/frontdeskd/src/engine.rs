use frontdesk_core::{
    Embedding, FaceOracle, FirstMatch, GalleryEntry, MatchResult, Matcher, OracleError,
};
use image::RgbImage;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("oracle error: {0}")]
    Oracle(#[from] OracleError),
    #[error("no face detected")]
    NoFaceDetected,
    #[error("failed to spawn engine thread: {0}")]
    Spawn(#[source] std::io::Error),
    #[error("engine thread exited")]
    ChannelClosed,
}

/// Messages sent from HTTP handlers to the engine thread.
enum EngineRequest {
    Encode {
        image: RgbImage,
        reply: oneshot::Sender<Result<Embedding, EngineError>>,
    },
    Match {
        probe: Embedding,
        gallery: Vec<(String, Embedding)>,
        tolerance: f32,
        reply: oneshot::Sender<MatchResult>,
    },
}

/// Clone-safe handle to the engine thread.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineRequest>,
}

impl EngineHandle {
    /// Encode the first (most confident) face in `image`.
    ///
    /// Additional faces in the photo are ignored.
    pub async fn encode_first(&self, image: RgbImage) -> Result<Embedding, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(EngineRequest::Encode {
                image,
                reply: reply_tx,
            })
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)?
    }

    /// Scan `gallery` in order and return the first entry within `tolerance`.
    pub async fn find_first_match(
        &self,
        probe: Embedding,
        gallery: Vec<(String, Embedding)>,
        tolerance: f32,
    ) -> Result<MatchResult, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(EngineRequest::Match {
                probe,
                gallery,
                tolerance,
                reply: reply_tx,
            })
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)
    }
}

/// Spawn the engine on a dedicated OS thread that owns the oracle.
///
/// ONNX sessions need exclusive access, so every encode and match request is
/// serialized through this thread.
pub fn spawn_engine(mut oracle: Box<dyn FaceOracle>) -> Result<EngineHandle, EngineError> {
    let (tx, mut rx) = mpsc::channel::<EngineRequest>(8);

    std::thread::Builder::new()
        .name("frontdesk-engine".into())
        .spawn(move || {
            tracing::info!("engine thread started");
            while let Some(req) = rx.blocking_recv() {
                match req {
                    EngineRequest::Encode { image, reply } => {
                        let _ = reply.send(run_encode(oracle.as_mut(), &image));
                    }
                    EngineRequest::Match {
                        probe,
                        gallery,
                        tolerance,
                        reply,
                    } => {
                        let _ = reply.send(run_match(oracle.as_ref(), &probe, &gallery, tolerance));
                    }
                }
            }
            tracing::info!("engine thread exiting");
        })
        .map_err(EngineError::Spawn)?;

    Ok(EngineHandle { tx })
}

fn run_encode(oracle: &mut dyn FaceOracle, image: &RgbImage) -> Result<Embedding, EngineError> {
    let embeddings = oracle.encode(image)?;
    tracing::debug!(
        faces = embeddings.len(),
        width = image.width(),
        height = image.height(),
        "encode: oracle finished"
    );

    if embeddings.len() > 1 {
        tracing::debug!(ignored = embeddings.len() - 1, "encode: using first face only");
    }

    embeddings.into_iter().next().ok_or(EngineError::NoFaceDetected)
}

fn run_match(
    oracle: &dyn FaceOracle,
    probe: &Embedding,
    gallery: &[(String, Embedding)],
    tolerance: f32,
) -> MatchResult {
    let entries: Vec<GalleryEntry<'_>> = gallery
        .iter()
        .map(|(id, embedding)| GalleryEntry { id: id.as_str(), embedding })
        .collect();

    let result = FirstMatch::new(oracle).compare(probe, &entries, tolerance);
    tracing::debug!(
        matched = result.matched,
        compared = result.compared,
        gallery = entries.len(),
        distance = ?result.distance,
        "match: scan finished"
    );
    result
}
