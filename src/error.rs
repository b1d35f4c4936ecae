use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RasterError {
    #[error("tile size must be greater than zero")]
    InvalidTileSize,
    #[error("{tile_size}px tiles do not partition a {width}x{height} surface")]
    InvalidTileGrid {
        width: usize,
        height: usize,
        tile_size: usize,
    },
    #[error("worker pool needs at least one worker and a queue capacity of at least one")]
    InvalidWorkerCount,
    #[error("buffer is {actual:?} but the tile grid covers {expected:?}")]
    DimensionMismatch {
        expected: (usize, usize),
        actual: (usize, usize),
    },
    #[error("task submitted to a closed worker pool")]
    PoolClosed,
    #[error("tile task panicked: {0}")]
    TaskPanicked(String),
    #[error("failed to spawn worker thread: {0}")]
    SpawnFailed(String),
}

pub type Result<T> = std::result::Result<T, RasterError>;
