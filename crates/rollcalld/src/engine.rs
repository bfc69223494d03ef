use rollcall_core::analyzer::{decode_rgb, AnalyzerError};
use rollcall_core::dataset::{embed_roster, DatasetError, DatasetReport};
use rollcall_core::{DetectedFace, FaceAnalyzer};
use std::path::PathBuf;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

#[derive(Error, Debug)]
pub enum EngineError {
    #[error(transparent)]
    Analyzer(#[from] AnalyzerError),
    #[error(transparent)]
    Dataset(#[from] DatasetError),
    #[error("failed to spawn engine thread: {0}")]
    Spawn(std::io::Error),
    #[error("engine thread exited")]
    ChannelClosed,
}

/// Messages sent from HTTP handlers to the engine thread.
enum EngineRequest {
    Analyze {
        name: String,
        bytes: Vec<u8>,
        reply: oneshot::Sender<Result<Vec<DetectedFace>, EngineError>>,
    },
    LoadRoster {
        dir: PathBuf,
        reply: oneshot::Sender<Result<DatasetReport, EngineError>>,
    },
}

/// Clone-safe handle to the engine thread.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineRequest>,
}

impl EngineHandle {
    /// Decode an encoded image and detect every face in it.
    pub async fn analyze(&self, name: &str, bytes: Vec<u8>) -> Result<Vec<DetectedFace>, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(EngineRequest::Analyze {
                name: name.to_string(),
                bytes,
                reply: reply_tx,
            })
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)?
    }

    /// Embed a roster folder.
    pub async fn load_roster(&self, dir: PathBuf) -> Result<DatasetReport, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(EngineRequest::LoadRoster { dir, reply: reply_tx })
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)?
    }
}

/// Spawn the engine on a dedicated OS thread that owns the analyzer.
///
/// Inference is blocking and the analyzer is not shareable, so every request
/// is serialized through this one thread.
pub fn spawn_engine<A>(mut analyzer: A) -> Result<EngineHandle, EngineError>
where
    A: FaceAnalyzer + Send + 'static,
{
    let (tx, mut rx) = mpsc::channel::<EngineRequest>(16);

    std::thread::Builder::new()
        .name("rollcall-engine".into())
        .spawn(move || {
            tracing::info!("engine thread started");
            while let Some(req) = rx.blocking_recv() {
                match req {
                    EngineRequest::Analyze { name, bytes, reply } => {
                        let result = run_analyze(&mut analyzer, &name, &bytes);
                        let _ = reply.send(result);
                    }
                    EngineRequest::LoadRoster { dir, reply } => {
                        let result = embed_roster(&dir, &mut analyzer).map_err(EngineError::from);
                        let _ = reply.send(result);
                    }
                }
            }
            tracing::info!("engine thread exiting");
        })
        .map_err(EngineError::Spawn)?;

    Ok(EngineHandle { tx })
}

fn run_analyze<A: FaceAnalyzer>(analyzer: &mut A, name: &str, bytes: &[u8]) -> Result<Vec<DetectedFace>, EngineError> {
    let image = decode_rgb(name, bytes)?;
    let faces = analyzer.detect(&image)?;
    tracing::debug!(
        image = name,
        width = image.width(),
        height = image.height(),
        faces = faces.len(),
        "analyze: detection done"
    );
    Ok(faces)
}
