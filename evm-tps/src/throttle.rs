use std::future::Future;
use std::time::Duration;

use thousands::Separable;
use tracing::info;

use crate::txpool::DepthSource;

/// Injectable suspension point so pacing can be tested without wall-clock delays.
pub trait Sleep: Send + Sync {
    fn sleep(&self, duration: Duration) -> impl Future<Output = ()> + Send;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TokioSleep;

impl Sleep for TokioSleep {
    fn sleep(&self, duration: Duration) -> impl Future<Output = ()> + Send {
        tokio::time::sleep(duration)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThrottleState {
    Flowing,
    Congested,
}

/// Back-pressure against the node's pending pool.
///
/// Enters `Congested` when a checkpoint reads a depth at or above the ceiling and only
/// returns to `Flowing` once the depth is strictly below 80% of the ceiling. The stored
/// lower bound is that fraction rounded up, so `depth < lower_bound` is exact for
/// ceilings that are not multiples of five. A ceiling of zero disables throttling.
#[derive(Debug, Clone)]
pub struct Throttle {
    ceiling: u64,
    lower_bound: u64,
    check_delay: Duration,
    state: ThrottleState,
    last_depth: u64,
}

/// Smallest depth that is not strictly below `ceiling * 4 / 5`.
fn lower_bound(ceiling: u64) -> u64 {
    // At most `ceiling`, so it always fits back into u64.
    ((u128::from(ceiling) * 4).div_ceil(5)) as u64
}

/// What one checkpoint observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Checkpoint {
    pub polls: u32,
    pub depth: u64,
    pub waited: Duration,
}

impl Throttle {
    pub fn new(ceiling: u64, check_delay: Duration) -> Self {
        Self { ceiling, lower_bound: lower_bound(ceiling), check_delay, state: ThrottleState::Flowing, last_depth: 0 }
    }

    pub fn ceiling(&self) -> u64 {
        self.ceiling
    }

    pub fn lower_bound(&self) -> u64 {
        self.lower_bound
    }

    pub fn state(&self) -> ThrottleState {
        self.state
    }

    pub fn last_depth(&self) -> u64 {
        self.last_depth
    }

    pub fn is_enabled(&self) -> bool {
        self.ceiling > 0
    }

    /// Feed one depth reading through the state machine.
    pub fn observe(&mut self, depth: u64) -> ThrottleState {
        self.last_depth = depth;
        self.state = match self.state {
            ThrottleState::Flowing if depth >= self.ceiling => ThrottleState::Congested,
            ThrottleState::Congested if depth < self.lower_bound => ThrottleState::Flowing,
            state => state,
        };
        self.state
    }

    /// Polling happens every `ceiling` accepted submissions, or on every call while congested.
    pub fn is_checkpoint(&self, submitted: u64) -> bool {
        self.is_enabled() && (submitted % self.ceiling == 0 || self.state == ThrottleState::Congested)
    }

    /// Poll at checkpoints and hold the caller while the pool is congested.
    pub async fn checkpoint<D: DepthSource, S: Sleep>(
        &mut self,
        submitted: u64,
        source: &D,
        sleeper: &S,
    ) -> Option<Checkpoint> {
        if !self.is_checkpoint(submitted) {
            return None;
        }

        let mut polls = 1;
        let mut waited = Duration::ZERO;
        let mut depth = source.depth().await;
        self.observe(depth);
        info!(
            submitted = %submitted.separate_with_commas(),
            depth = %depth.separate_with_commas(),
            ceiling = self.ceiling,
            "txpool checkpoint"
        );

        let mut last_logged = depth;
        while self.state == ThrottleState::Congested {
            if depth != last_logged || polls == 1 {
                info!(depth, lower_bound = self.lower_bound, "txpool is still too full, waiting");
                last_logged = depth;
            }
            sleeper.sleep(self.check_delay).await;
            waited += self.check_delay;
            depth = source.depth().await;
            polls += 1;
            self.observe(depth);
        }

        Some(Checkpoint { polls, depth, waited })
    }
}


#[cfg(test)]
mod tests {
    use super::testing::{RecordingSleep, ScriptedDepth};
    use super::*;
    use ThrottleState::{Congested, Flowing};

    const DELAY: Duration = Duration::from_millis(250);

    #[test]
    fn hysteresis_band() {
        let mut throttle = Throttle::new(100, DELAY);
        assert_eq!(throttle.lower_bound(), 80);

        let states: Vec<_> = [100, 90, 85, 79, 95, 100].into_iter().map(|depth| throttle.observe(depth)).collect();
        assert_eq!(states, vec![Congested, Congested, Congested, Flowing, Flowing, Congested]);
    }

    #[test]
    fn boundary_values() {
        let mut throttle = Throttle::new(100, DELAY);
        assert_eq!(throttle.observe(99), Flowing);
        assert_eq!(throttle.observe(100), Congested);
        assert_eq!(throttle.observe(80), Congested);
        assert_eq!(throttle.observe(79), Flowing);
    }

    #[test]
    fn lower_bound_rounds_up() {
        // 3.2: depth 3 is already below it.
        let mut throttle = Throttle::new(4, DELAY);
        assert_eq!(throttle.lower_bound(), 4);
        assert_eq!(throttle.observe(4), Congested);
        assert_eq!(throttle.observe(3), Flowing);

        // 5.6: depth 5 releases, depth 6 does not.
        let mut throttle = Throttle::new(7, DELAY);
        assert_eq!(throttle.lower_bound(), 6);
        assert_eq!(throttle.observe(7), Congested);
        assert_eq!(throttle.observe(6), Congested);
        assert_eq!(throttle.observe(5), Flowing);

        // 2284.8 for the ceiling derived from a 30M block of 21k transfers.
        let mut throttle = Throttle::new(2856, DELAY);
        assert_eq!(throttle.observe(2856), Congested);
        assert_eq!(throttle.observe(2285), Congested);
        assert_eq!(throttle.observe(2284), Flowing);
    }

    #[test]
    fn huge_ceilings_do_not_overflow() {
        let mut throttle = Throttle::new(9_000_000_000_000_000_000, DELAY);
        assert_eq!(throttle.lower_bound(), 7_200_000_000_000_000_000);

        let mut max = Throttle::new(u64::MAX, DELAY);
        assert_eq!(max.lower_bound(), u64::MAX / 5 * 4);
        assert_eq!(max.observe(u64::MAX), Congested);
        assert_eq!(throttle.observe(u64::MAX), Congested);
        assert_eq!(throttle.observe(7_199_999_999_999_999_999), Flowing);
    }

    #[test]
    fn checkpoints_every_ceiling_submissions() {
        let mut throttle = Throttle::new(50, DELAY);
        let checkpoints: Vec<_> = (1..=200).filter(|&n| throttle.is_checkpoint(n)).collect();
        assert_eq!(checkpoints, vec![50, 100, 150, 200]);

        throttle.observe(60);
        assert!(throttle.is_checkpoint(51), "congested throttle checks on every submission");
    }

    #[test]
    fn zero_ceiling_disables_throttling() {
        let throttle = Throttle::new(0, DELAY);
        assert!(!throttle.is_enabled());
        assert!(!throttle.is_checkpoint(0));
        assert!(!throttle.is_checkpoint(10));
    }

    #[tokio::test]
    async fn waits_until_below_lower_bound() {
        let mut throttle = Throttle::new(100, DELAY);
        let source = ScriptedDepth::new([120, 100, 90, 85, 79]);
        let sleeper = RecordingSleep::default();

        let checkpoint = throttle.checkpoint(100, &source, &sleeper).await.unwrap();

        assert_eq!(checkpoint, Checkpoint { polls: 5, depth: 79, waited: DELAY * 4 });
        assert_eq!(sleeper.count(), 4);
        assert_eq!(sleeper.total(), DELAY * 4);
        assert_eq!(throttle.state(), Flowing);
    }

    #[tokio::test]
    async fn flowing_checkpoint_does_not_sleep() {
        let mut throttle = Throttle::new(100, DELAY);
        let source = ScriptedDepth::new([40]);
        let sleeper = RecordingSleep::default();

        assert_eq!(throttle.checkpoint(99, &source, &sleeper).await, None);
        let checkpoint = throttle.checkpoint(200, &source, &sleeper).await.unwrap();
        assert_eq!(checkpoint.polls, 1);
        assert_eq!(sleeper.count(), 0);
    }
}
