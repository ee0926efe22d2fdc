//! Probability map extraction from detection model output
//!
//! Detection models ship with varying output layouts: `[1,1,H,W]`,
//! `[1,H,W,1]`, `[1,H,W]` or plain `[H,W]`. Rather than branching on rank
//! throughout the detector, a single classifier resolves the layout into one
//! canonical row-major plane up front. Unknown layouts yield `None` and the
//! detector falls back to a whole-image box.

use crate::inference::TensorData;

/// A 2D grid of probabilities in [0,1].
#[derive(Debug, Clone)]
pub struct ProbabilityMap {
    pub width: usize,
    pub height: usize,
    data: Vec<f32>,
}

/// Logistic function. Maps any real input into (0,1).
pub fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}

/// The recognized output layouts, trailing plane in row-major order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PlaneLayout {
    /// [1,1,H,W] or [1,H,W] or [H,W]: contiguous H*W plane.
    Contiguous { height: usize, width: usize },
    /// [1,H,W,1]: channel-last, stride 1 between pixels so still contiguous.
    ChannelLast { height: usize, width: usize },
}

fn classify_layout(shape: &[usize]) -> Option<PlaneLayout> {
    match *shape {
        [1, 1, h, w] if h > 0 && w > 0 => Some(PlaneLayout::Contiguous { height: h, width: w }),
        [1, h, w, 1] if h > 0 && w > 0 => Some(PlaneLayout::ChannelLast { height: h, width: w }),
        [1, h, w] if h > 0 && w > 0 => Some(PlaneLayout::Contiguous { height: h, width: w }),
        [h, w] if h > 0 && w > 0 => Some(PlaneLayout::Contiguous { height: h, width: w }),
        _ => None,
    }
}

impl ProbabilityMap {
    /// Resolve a raw detection output into a probability plane.
    ///
    /// Returns `None` when the tensor layout is not one of the known
    /// single-channel variants. Raw scores outside [0,1] are treated as
    /// logits and passed through the logistic function per element.
    pub fn from_tensor(tensor: &TensorData) -> Option<ProbabilityMap> {
        let data = tensor.as_f32()?;
        let layout = classify_layout(tensor.shape())?;
        let (height, width) = match layout {
            PlaneLayout::Contiguous { height, width } | PlaneLayout::ChannelLast { height, width } => {
                (height, width)
            }
        };
        if data.len() != height * width {
            return None;
        }

        let needs_squash = data.iter().any(|&v| !(0.0..=1.0).contains(&v));
        let plane: Vec<f32> = if needs_squash {
            data.iter().map(|&v| sigmoid(v)).collect()
        } else {
            data.to_vec()
        };

        Some(ProbabilityMap {
            width,
            height,
            data: plane,
        })
    }

    #[inline]
    pub fn get(&self, x: usize, y: usize) -> f32 {
        self.data[y * self.width + x]
    }

    #[cfg(test)]
    pub fn from_plane(width: usize, height: usize, data: Vec<f32>) -> Self {
        assert_eq!(data.len(), width * height);
        Self {
            width,
            height,
            data,
        }
    }
}
