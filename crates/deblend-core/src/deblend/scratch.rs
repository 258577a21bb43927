use ndarray::Array2;

/// Pool of reusable `f32` rasters owned by one worker.
///
/// Each detection borrows buffers with [`take`](ScratchArena::take) and hands
/// them back with [`give`](ScratchArena::give), so a worker allocates roughly
/// once per raster pass instead of once per template.
#[derive(Debug, Default)]
pub struct ScratchArena {
    pool: Vec<Vec<f32>>,
}

impl ScratchArena {
    pub fn new() -> Self {
        Self::default()
    }

    /// A zero-filled raster of `shape`, reusing a pooled buffer when possible.
    pub fn take(&mut self, shape: (usize, usize)) -> Array2<f32> {
        let len = shape.0 * shape.1;
        let mut buf = self.pool.pop().unwrap_or_default();
        buf.clear();
        buf.resize(len, 0.0);
        Array2::from_shape_vec(shape, buf).unwrap_or_else(|_| Array2::zeros(shape))
    }

    /// Return a raster to the pool.
    pub fn give(&mut self, array: Array2<f32>) {
        let (buf, _) = array.into_raw_vec_and_offset();
        self.pool.push(buf);
    }

    pub fn give_all(&mut self, arrays: impl IntoIterator<Item = Array2<f32>>) {
        for a in arrays {
            self.give(a);
        }
    }

    /// Number of pooled buffers.
    pub fn pooled(&self) -> usize {
        self.pool.len()
    }
}
