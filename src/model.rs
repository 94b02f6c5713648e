//! Model collaborator trait and scoped head customization.
//!
//! The engine treats the underlying network as a black box behind the
//! [`Model`] trait: a batched forward pass plus a train/eval toggle and an
//! optional broadcast-buffer capability for data-parallel runtimes.
//!
//! Head customization — temperature division, class-column subsetting, and
//! softmax — is a *scoped* rewrite of one forward pass, never a persistent
//! mutation of the model. [`HeadView`] borrows the model for the duration
//! of the scope, so the rewrite is removed on every exit path by
//! construction, and nested scopes over different class subsets compose
//! because each view is an independent value.

use crate::numeric::softmax_rows;
use ndarray::{Array2, Axis};

/// Black-box model: batched inputs in, `(n, c)` output rows out.
pub trait Model {
    /// Forward pass over a batch of input rows.
    fn forward(&mut self, inputs: &Array2<f64>) -> Array2<f64>;

    /// Switch between training and evaluation behavior. No-op by default.
    fn set_training(&mut self, _training: bool) {}

    /// Whether distributed buffer broadcast is currently enabled.
    ///
    /// Non-distributed models keep the defaults: always-on, set ignored.
    fn broadcast_enabled(&self) -> bool {
        true
    }

    /// Enable or disable distributed buffer broadcast.
    fn set_broadcast_enabled(&mut self, _enabled: bool) {}
}

/// Output rewrite applied by a [`HeadView`]: divide by a temperature,
/// restrict to a class subset, optionally apply softmax — in that order.
#[derive(Clone, Debug)]
pub struct HeadSpec {
    pub temp: f64,
    pub class_ids: Option<Vec<usize>>,
    pub softmax: bool,
}

impl Default for HeadSpec {
    fn default() -> Self {
        Self {
            temp: 1.0,
            class_ids: None,
            softmax: false,
        }
    }
}

impl HeadSpec {
    /// Raw logits restricted to a class subset (no temperature, no softmax).
    pub fn restricted(class_ids: Option<Vec<usize>>) -> Self {
        Self {
            class_ids,
            ..Self::default()
        }
    }

    /// Apply the rewrite to a batch of raw outputs.
    pub fn apply(&self, outputs: Array2<f64>) -> Array2<f64> {
        let mut out = outputs;
        if self.temp != 1.0 {
            out.mapv_inplace(|v| v / self.temp);
        }
        if let Some(ids) = &self.class_ids {
            out = out.select(Axis(1), ids);
        }
        if self.softmax {
            out = softmax_rows(&out);
        }
        out
    }
}

/// A model view with a head rewrite installed for the scope of the borrow.
pub struct HeadView<'a> {
    model: &'a mut dyn Model,
    spec: HeadSpec,
}

impl<'a> HeadView<'a> {
    pub fn new(model: &'a mut dyn Model, spec: HeadSpec) -> Self {
        Self { model, spec }
    }

    pub fn spec(&self) -> &HeadSpec {
        &self.spec
    }
}

impl Model for HeadView<'_> {
    fn forward(&mut self, inputs: &Array2<f64>) -> Array2<f64> {
        self.spec.apply(self.model.forward(inputs))
    }

    fn set_training(&mut self, training: bool) {
        self.model.set_training(training);
    }

    fn broadcast_enabled(&self) -> bool {
        self.model.broadcast_enabled()
    }

    fn set_broadcast_enabled(&mut self, enabled: bool) {
        self.model.set_broadcast_enabled(enabled);
    }
}

/// Scoped suspension of broadcast-buffer synchronization.
///
/// Disables broadcast on creation and restores the *prior* setting on drop,
/// including early returns and panics.
pub struct BroadcastGuard<'a> {
    model: &'a mut dyn Model,
    previous: bool,
}

impl<'a> BroadcastGuard<'a> {
    pub fn disable(model: &'a mut dyn Model) -> Self {
        let previous = model.broadcast_enabled();
        model.set_broadcast_enabled(false);
        Self { model, previous }
    }

    /// Access the guarded model for forward passes inside the scope.
    pub fn model(&mut self) -> &mut dyn Model {
        self.model
    }
}

impl Drop for BroadcastGuard<'_> {
    fn drop(&mut self) {
        self.model.set_broadcast_enabled(self.previous);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::array;

    struct Echo {
        broadcast: bool,
    }

    impl Model for Echo {
        fn forward(&mut self, inputs: &Array2<f64>) -> Array2<f64> {
            inputs.clone()
        }

        fn broadcast_enabled(&self) -> bool {
            self.broadcast
        }

        fn set_broadcast_enabled(&mut self, enabled: bool) {
            self.broadcast = enabled;
        }
    }

    #[test]
    fn test_head_spec_temperature_and_subset() {
        let spec = HeadSpec {
            temp: 2.0,
            class_ids: Some(vec![2, 0]),
            softmax: false,
        };
        let out = spec.apply(array![[2.0, 4.0, 6.0]]);
        assert_eq!(out, array![[3.0, 1.0]]);
    }

    #[test]
    fn test_head_spec_softmax_rows() {
        let spec = HeadSpec {
            temp: 1.0,
            class_ids: None,
            softmax: true,
        };
        let out = spec.apply(array![[0.0, 0.0]]);
        assert_relative_eq!(out[[0, 0]], 0.5, epsilon = 1e-12);
        assert_relative_eq!(out[[0, 1]], 0.5, epsilon = 1e-12);
    }

    #[test]
    fn test_head_view_rewrites_forward() {
        let mut model = Echo { broadcast: true };
        let spec = HeadSpec::restricted(Some(vec![1]));
        let mut view = HeadView::new(&mut model, spec);
        let out = view.forward(&array![[1.0, 2.0], [3.0, 4.0]]);
        assert_eq!(out, array![[2.0], [4.0]]);
    }

    #[test]
    fn test_nested_head_views_are_independent() {
        let mut model = Echo { broadcast: true };
        {
            let spec = HeadSpec::restricted(Some(vec![0]));
            let mut view = HeadView::new(&mut model, spec);
            assert_eq!(view.forward(&array![[1.0, 2.0]]), array![[1.0]]);
        }
        {
            let spec = HeadSpec::restricted(Some(vec![1]));
            let mut view = HeadView::new(&mut model, spec);
            assert_eq!(view.forward(&array![[1.0, 2.0]]), array![[2.0]]);
        }
        // Underlying model is untouched once scopes end
        assert_eq!(model.forward(&array![[1.0, 2.0]]), array![[1.0, 2.0]]);
    }

    #[test]
    fn test_broadcast_guard_restores_prior_setting() {
        let mut model = Echo { broadcast: true };
        {
            let mut guard = BroadcastGuard::disable(&mut model);
            assert!(!guard.model().broadcast_enabled());
        }
        assert!(model.broadcast_enabled());

        // A model that already had broadcast off stays off afterwards
        let mut model = Echo { broadcast: false };
        {
            let _guard = BroadcastGuard::disable(&mut model);
        }
        assert!(!model.broadcast_enabled());
    }
}
