use image::{ImageFormat, RgbImage};
use ndarray::Array1;
use serde::{Deserialize, Serialize};
use std::io::{Cursor, Write};
use std::process::{Command, Stdio};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EncoderError {
    #[error("Failed to start encoder '{command}': {source}")]
    Spawn {
        command: String,
        source: std::io::Error,
    },
    #[error("Encoder I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to encode frame: {0}")]
    Frame(#[from] image::ImageError),
    #[error("Encoder exited with {status}: {stderr}")]
    Failed { status: String, stderr: String },
    #[error("Malformed encoder output: {0}")]
    Output(#[from] serde_json::Error),
}

/// Fixed-length numeric encoding of one detected face
pub type Embedding = Array1<f32>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

/// A face found in an image together with its encoding
#[derive(Debug, Clone)]
pub struct EncodedFace {
    pub bbox: BoundingBox,
    pub encoding: Embedding,
}

/// Detects faces in an image and computes one encoding per face.
///
/// Faces are returned in the order the underlying detector reports them;
/// callers that need a single reference encoding take the first.
pub trait FaceEncoder {
    fn detect_and_encode(&mut self, image: &RgbImage) -> Result<Vec<EncodedFace>, EncoderError>;
}

#[derive(Debug, Deserialize)]
struct WireFace {
    bbox: BoundingBox,
    encoding: Vec<f32>,
}

/// Runs an external helper program once per image.
///
/// The frame is written to the child's stdin as PNG. The child answers on
/// stdout with a JSON array of `{"bbox": {..}, "encoding": [..]}` objects.
pub struct CommandEncoder {
    command: String,
    args: Vec<String>,
}

impl CommandEncoder {
    pub fn new(command: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            command: command.into(),
            args,
        }
    }

    fn parse_output(stdout: &[u8]) -> Result<Vec<EncodedFace>, EncoderError> {
        let faces: Vec<WireFace> = serde_json::from_slice(stdout)?;
        Ok(faces
            .into_iter()
            .map(|f| EncodedFace {
                bbox: f.bbox,
                encoding: Array1::from(f.encoding),
            })
            .collect())
    }
}

impl FaceEncoder for CommandEncoder {
    fn detect_and_encode(&mut self, image: &RgbImage) -> Result<Vec<EncodedFace>, EncoderError> {
        let mut png = Vec::new();
        image.write_to(&mut Cursor::new(&mut png), ImageFormat::Png)?;

        let mut child = Command::new(&self.command)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| EncoderError::Spawn {
                command: self.command.clone(),
                source,
            })?;

        // Feed stdin from a separate thread so a chatty child cannot fill its
        // stdout pipe while we are still writing.
        let writer = child.stdin.take().map(|mut stdin| {
            std::thread::spawn(move || -> std::io::Result<()> {
                stdin.write_all(&png)?;
                stdin.flush()
            })
        });

        let output = child.wait_with_output()?;
        let written = match writer.map(|handle| handle.join()) {
            Some(Ok(result)) => result,
            Some(Err(_)) => {
                log::warn!("Encoder stdin writer panicked");
                Ok(())
            }
            None => Ok(()),
        };

        if !output.status.success() {
            return Err(EncoderError::Failed {
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        // A helper that exits cleanly without reading all of stdin is fine
        match written {
            Err(e) if e.kind() == std::io::ErrorKind::BrokenPipe => {
                log::debug!("Encoder closed stdin early: {}", e)
            }
            other => other?,
        }

        let faces = Self::parse_output(&output.stdout)?;
        log::debug!("Encoder reported {} face(s)", faces.len());
        Ok(faces)
    }
}
