use futures::{stream, Stream};
use std::time::Duration;
use tokio::time::{interval, Interval, MissedTickBehavior};

/// Successively longer prefixes of `text`, one more character per tick of a
/// `step` interval, finishing with the whole text. Empty text yields a single
/// empty frame.
pub fn reveal(text: &str, step: Duration) -> impl Stream<Item = String> {
    let chars: Vec<char> = text.chars().collect();
    // Interval panics on a zero period
    let period = step.max(Duration::from_millis(1));

    stream::unfold(
        (chars, 0usize, None::<Interval>, false),
        move |(chars, shown, ticker, done)| async move {
            if done {
                return None;
            }
            // Created on first poll so the stream can be built outside a runtime
            let mut ticker = ticker.unwrap_or_else(|| {
                let mut ticker = interval(period);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                ticker
            });
            // The first tick completes immediately
            ticker.tick().await;
            let next = (shown + 1).min(chars.len());
            let frame: String = chars[..next].iter().collect();
            let finished = next == chars.len();
            Some((frame, (chars, next, Some(ticker), finished)))
        },
    )
}
