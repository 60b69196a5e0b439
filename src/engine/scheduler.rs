use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

/// Periodic signal source with a single owner.
///
/// `start` always stops the previous cadence first, so restarts never stack
/// timers. Each start bumps a generation number carried by the emitted
/// signal; signals from an earlier generation that were already queued can be
/// discarded with [`Ticker::is_current`]. Dropping the ticker aborts its task.
pub struct Ticker<S> {
    period: Duration,
    tx: mpsc::Sender<S>,
    make: fn(u64) -> S,
    task: Option<JoinHandle<()>>,
    generation: u64,
}

impl<S: Send + 'static> Ticker<S> {
    pub fn new(period: Duration, tx: mpsc::Sender<S>, make: fn(u64) -> S) -> Self {
        Self {
            period,
            tx,
            make,
            task: None,
            generation: 0,
        }
    }

    /// First signal fires one period from now.
    pub fn start(&mut self) {
        self.stop();
        self.generation += 1;

        let generation = self.generation;
        let period = self.period;
        let tx = self.tx.clone();
        let make = self.make;
        self.task = Some(tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                if tx.send(make(generation)).await.is_err() {
                    break;
                }
            }
        }));
    }

    pub fn stop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }

    pub fn is_running(&self) -> bool {
        self.task.is_some()
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// True if a signal stamped `generation` came from the live cadence.
    pub fn is_current(&self, generation: u64) -> bool {
        self.task.is_some() && generation == self.generation
    }
}

impl<S> Drop for Ticker<S> {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq)]
    struct Tick(u64);

    fn ticker(tx: mpsc::Sender<Tick>) -> Ticker<Tick> {
        Ticker::new(Duration::from_secs(1), tx, Tick)
    }

    #[tokio::test(start_paused = true)]
    async fn emits_on_cadence_with_generation() {
        let (tx, mut rx) = mpsc::channel(8);
        let mut t = ticker(tx);
        t.start();

        assert_eq!(rx.recv().await, Some(Tick(1)));
        assert_eq!(rx.recv().await, Some(Tick(1)));
        assert!(t.is_current(1));
    }

    #[tokio::test(start_paused = true)]
    async fn restart_replaces_previous_cadence() {
        let (tx, mut rx) = mpsc::channel(8);
        let mut t = ticker(tx);
        t.start();
        t.start();
        assert!(!t.is_current(1));
        assert!(t.is_current(2));

        tokio::time::sleep(Duration::from_millis(3_500)).await;
        let mut received = Vec::new();
        while let Ok(tick) = rx.try_recv() {
            received.push(tick);
        }
        assert_eq!(received, vec![Tick(2), Tick(2), Tick(2)]);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_and_drop_silence_the_timer() {
        let (tx, mut rx) = mpsc::channel(8);
        let mut t = ticker(tx.clone());
        t.start();
        t.stop();
        assert!(!t.is_running());
        assert!(!t.is_current(1));

        let mut dropped = ticker(tx);
        dropped.start();
        drop(dropped);

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(rx.try_recv().is_err());
    }
}
