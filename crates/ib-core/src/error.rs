#[derive(Debug, thiserror::Error)]
pub enum BoardError {
    #[error("failed to encode board: {0}")]
    Encode(#[from] rmp_serde::encode::Error),

    #[error("failed to decode board: {0}")]
    Decode(#[from] rmp_serde::decode::Error),
}
