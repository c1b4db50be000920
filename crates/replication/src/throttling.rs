//! Backoff and adaptive rate control for gossip pacing.

use std::time::{Duration, Instant};

/// `next = min(current * factor, maximum) + uniform(0, jitter)`.
pub struct ExponentialBackoff {
    initial: f64,
    factor: f64,
    maximum: f64,
    jitter: f64,
    current: f64,
}

impl ExponentialBackoff {
    pub fn new(initial: Duration, factor: f64, maximum: Duration, jitter: Duration) -> Self {
        let initial = initial.as_secs_f64();
        Self {
            initial,
            factor,
            maximum: maximum.as_secs_f64(),
            jitter: jitter.as_secs_f64(),
            current: initial,
        }
    }

    pub fn next(&mut self) -> Duration {
        let candidate = (self.current * self.factor).min(self.maximum);
        self.current = candidate;
        let with_jitter = candidate + rand::random::<f64>() * self.jitter;
        Duration::from_secs_f64(with_jitter.max(0.0))
    }

    pub fn reset(&mut self) {
        self.current = self.initial;
    }
}

/// CUBIC-style adaptive rate controller, maintaining a rate in units/s.
pub struct CubicRateController {
    rate: f64,
    min_rate: f64,
    max_rate: f64,
    beta: f64,
    c: f64,
    w_max: f64,
    t_loss: Option<Instant>,
    k: f64,
}

impl CubicRateController {
    pub fn new(initial_rate: f64, min_rate: f64, max_rate: f64, beta: f64, c: f64) -> Self {
        let rate = initial_rate.clamp(min_rate, max_rate);
        Self {
            rate,
            min_rate,
            max_rate,
            beta,
            c,
            w_max: rate,
            t_loss: None,
            k: 0.0,
        }
    }

    pub fn rate(&self) -> f64 {
        self.rate
    }

    pub fn on_error_at(&mut self, now: Instant) {
        self.w_max = self.rate;
        self.t_loss = Some(now);
        self.k = (self.w_max * (1.0 - self.beta) / self.c).cbrt();
        self.rate = (self.rate * self.beta).max(self.min_rate);
    }

    pub fn on_success_at(&mut self, now: Instant) {
        match self.t_loss {
            None => {
                self.rate = (self.rate * 1.05).min(self.max_rate);
            }
            Some(t_loss) => {
                let t = now.saturating_duration_since(t_loss).as_secs_f64();
                let candidate = self.c * (t - self.k).powi(3) + self.w_max;
                self.rate = candidate.clamp(self.min_rate, self.max_rate);
            }
        }
    }

    pub fn on_error(&mut self) {
        self.on_error_at(Instant::now());
    }

    pub fn on_success(&mut self) {
        self.on_success_at(Instant::now());
    }
}

/// Exposes the controller's rate as a pacing delay.
pub struct CubicRateLimiter {
    controller: CubicRateController,
}

impl CubicRateLimiter {
    pub fn new(controller: CubicRateController) -> Self {
        Self { controller }
    }

    pub fn delay(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.controller.rate())
    }

    pub fn on_error(&mut self) {
        self.controller.on_error();
    }

    pub fn on_success(&mut self) {
        self.controller.on_success();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_grows_and_clamps_to_maximum() {
        let mut backoff = ExponentialBackoff::new(
            Duration::from_millis(100),
            2.0,
            Duration::from_secs(1),
            Duration::ZERO,
        );
        let first = backoff.next();
        let second = backoff.next();
        assert!(second > first);
        for _ in 0..10 {
            backoff.next();
        }
        assert!(backoff.next() <= Duration::from_secs(1) + Duration::from_millis(1));
    }

    #[test]
    fn backoff_reset_restores_initial() {
        let mut backoff = ExponentialBackoff::new(
            Duration::from_millis(100),
            2.0,
            Duration::from_secs(1),
            Duration::ZERO,
        );
        backoff.next();
        backoff.next();
        backoff.reset();
        let after_reset = backoff.next();
        assert!(after_reset <= Duration::from_millis(210));
    }

    #[test]
    fn cubic_rate_drops_on_error_and_recovers_on_success() {
        let mut ctl = CubicRateController::new(100.0, 1.0, 1000.0, 0.2, 0.4);
        let t0 = Instant::now();
        ctl.on_error_at(t0);
        assert!(ctl.rate() < 100.0);

        let dropped = ctl.rate();
        ctl.on_success_at(t0 + Duration::from_millis(1));
        assert!(ctl.rate() >= dropped);
    }

    #[test]
    fn cubic_rate_gentle_growth_before_any_loss() {
        let mut ctl = CubicRateController::new(10.0, 1.0, 1000.0, 0.2, 0.4);
        ctl.on_success();
        assert!((ctl.rate() - 10.5).abs() < 1e-9);
    }

    #[test]
    fn rate_limiter_delay_is_inverse_of_rate() {
        let ctl = CubicRateController::new(10.0, 1.0, 1000.0, 0.2, 0.4);
        let limiter = CubicRateLimiter::new(ctl);
        assert!((limiter.delay().as_secs_f64() - 0.1).abs() < 1e-9);
    }
}
