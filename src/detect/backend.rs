use anyhow::Result;

use crate::detect::result::ObjectObservation;
use crate::frame::InferenceView;

/// Detector backend trait.
///
/// A backend wraps one loaded model. It sees each frame through an
/// `InferenceView` and reports every object it found together with all of the
/// candidate labels it considered for that object. Label selection and
/// thresholding happen in `InferenceEngine`, not here.
pub trait DetectorBackend: Send {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    /// Run the model on one frame. Blocks until results are available.
    fn detect(&mut self, view: InferenceView<'_>) -> Result<Vec<ObjectObservation>>;

    /// Optional warm-up hook, run once before the pipeline starts.
    fn warm_up(&mut self) -> Result<()> {
        Ok(())
    }
}
