//! External policy capability (§6): the neural network itself is out of
//! scope (Non-goals, §1) — this crate only needs the boundary it calls
//! across. A concrete policy wraps its own internal denoise loop with
//! [`guidance::denoise_step`] per §4.2; that wiring lives with the policy,
//! not here.

use async_trait::async_trait;
use common::AppError;
use tch::Tensor;

/// `predict_action_chunk` / `to(device)` / `eval()` / `from_pretrained(path)`
/// (§6). `obs` is the fully pre-processed, batched policy input; the
/// returned tensor is `(B, chunk_size, action_dim)` in the policy's raw
/// (normalized) action space.
#[async_trait]
pub trait Policy: Send + Sync {
    async fn predict_action_chunk(
        &self,
        obs: &Tensor,
        inference_delay: u64,
        prev_chunk_left_over: Option<&Tensor>,
    ) -> Result<Tensor, AppError>;
}

/// Normalization bundled with the policy, applied to the batched
/// observation before `predict_action_chunk` (§4.6 step 5).
pub trait PolicyPreProcessor: Send + Sync {
    fn process(&self, obs: &Tensor) -> Tensor;
}

/// Inverse normalization from the policy's raw action space to robot
/// command units (§4.6 step 8).
pub trait PolicyPostProcessor: Send + Sync {
    fn process(&self, raw_chunk: &Tensor) -> Tensor;
}
