/// An automatable gain, scheduled against the processing context's clock.
///
/// Supports the subset of gain automation the arbiter needs: an immediate
/// value change and one linear ramp at a time. Times are context seconds,
/// never wall-clock.
#[derive(Debug, Clone, PartialEq)]
pub struct GainParam {
    value: f32,
    ramp: Option<LinearRamp>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct LinearRamp {
    start_time: f64,
    start_value: f32,
    end_time: f64,
    end_value: f32,
}

impl LinearRamp {
    fn value_at(&self, time: f64) -> f32 {
        if time <= self.start_time {
            return self.start_value;
        }
        if time >= self.end_time {
            return self.end_value;
        }
        let progress = ((time - self.start_time) / (self.end_time - self.start_time)) as f32;
        self.start_value + (self.end_value - self.start_value) * progress
    }
}

impl GainParam {
    pub fn new(value: f32) -> Self {
        Self {
            value: value.clamp(0.0, 1.0),
            ramp: None,
        }
    }

    /// Set the gain immediately, dropping any scheduled ramp.
    pub fn set_value(&mut self, value: f32) {
        self.value = value.clamp(0.0, 1.0);
        self.ramp = None;
    }

    /// Ramp linearly from the value held at `start_time` to `target` at `end_time`.
    ///
    /// Replaces any ramp still in progress, starting from wherever it had got to.
    pub fn linear_ramp_to_value_at_time(&mut self, target: f32, start_time: f64, end_time: f64) {
        let start_value = self.value_at(start_time);
        let target = target.clamp(0.0, 1.0);
        if end_time <= start_time {
            self.set_value(target);
            return;
        }
        self.value = start_value;
        self.ramp = Some(LinearRamp {
            start_time,
            start_value,
            end_time,
            end_value: target,
        });
    }

    /// Freeze the gain at whatever it is at `time`.
    pub fn cancel_scheduled_values(&mut self, time: f64) {
        let held = self.value_at(time);
        self.set_value(held);
    }

    /// Gain in effect at context time `time`.
    pub fn value_at(&self, time: f64) -> f32 {
        match &self.ramp {
            Some(ramp) => ramp.value_at(time),
            None => self.value,
        }
    }

    /// Collapse a finished ramp into the resting value.
    pub fn settle(&mut self, time: f64) {
        if let Some(ramp) = self.ramp {
            if time >= ramp.end_time {
                self.value = ramp.end_value;
                self.ramp = None;
            }
        }
    }

    /// Whether a ramp is still moving at `time`.
    pub fn is_ramping(&self, time: f64) -> bool {
        self.ramp.map(|r| time < r.end_time).unwrap_or(false)
    }

    /// Value the gain will rest at once any ramp completes.
    pub fn target(&self) -> f32 {
        self.ramp.map(|r| r.end_value).unwrap_or(self.value)
    }
}
