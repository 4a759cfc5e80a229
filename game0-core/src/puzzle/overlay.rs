use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use super::{Phase, PuzzleGame};
use crate::config::PuzzleCfg;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverlayExit {
    Cancelled,
    GameOver,
}

/// Drive `game` on a fixed `tick_ms` timer until `token` fires or the game ends.
///
/// The loop owns its own clock and only touches the puzzle; inputs from
/// elsewhere go through the shared mutex. `on_frame` runs after every tick.
pub async fn run_overlay<F>(
    game: Arc<Mutex<PuzzleGame>>,
    cfg: &PuzzleCfg,
    token: CancellationToken,
    mut on_frame: F,
) -> OverlayExit
where
    F: FnMut(&PuzzleGame),
{
    let mut interval = tokio::time::interval(Duration::from_millis(cfg.tick_ms.max(1)));
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    {
        let mut g = game.lock().unwrap_or_else(PoisonError::into_inner);
        if g.phase() == Phase::Idle {
            g.start(Instant::now());
        }
    }

    loop {
        tokio::select! {
            biased;
            _ = token.cancelled() => {
                tracing::debug!("puzzle overlay cancelled");
                return OverlayExit::Cancelled;
            }
            now = interval.tick() => {
                let mut g = game.lock().unwrap_or_else(PoisonError::into_inner);
                if cfg.attract {
                    g.attract_step();
                }
                g.tick(now);
                on_frame(&g);
                if g.is_over() {
                    return OverlayExit::GameOver;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::puzzle::StepOutcome;

    fn cfg(drop_interval_ms: u64, attract: bool) -> PuzzleCfg {
        PuzzleCfg {
            tick_ms: 50,
            drop_interval_ms,
            attract,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn runs_until_cancelled() {
        let cfg = cfg(800, false);
        let game = Arc::new(Mutex::new(PuzzleGame::with_seed(&cfg, 1)));
        let token = CancellationToken::new();
        let frames = Arc::new(Mutex::new(0usize));

        let handle = {
            let (game, token, frames, cfg) = (game.clone(), token.clone(), frames.clone(), cfg.clone());
            tokio::spawn(async move {
                run_overlay(game, &cfg, token, |_| *frames.lock().unwrap() += 1).await
            })
        };

        tokio::time::sleep(Duration::from_millis(1_000)).await;
        token.cancel();
        assert_eq!(handle.await.unwrap(), OverlayExit::Cancelled);

        let n = *frames.lock().unwrap();
        assert!((15..=25).contains(&n), "frames: {n}");
        let g = game.lock().unwrap();
        assert_eq!(g.phase(), Phase::Falling);
        assert_eq!(g.current().unwrap().position.y, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn stops_when_the_game_ends() {
        let cfg = cfg(1, false);
        let game = Arc::new(Mutex::new(PuzzleGame::with_seed(&cfg, 8)));
        let mut last_frame = String::new();
        let exit = run_overlay(game.clone(), &cfg, CancellationToken::new(), |g| {
            last_frame = g.render_text();
        })
        .await;
        assert_eq!(exit, OverlayExit::GameOver);
        assert!(last_frame.ends_with("GAME OVER\n"));
        assert!(game.lock().unwrap().pieces_locked() > 0);
    }

    #[tokio::test(start_paused = true)]
    async fn external_input_goes_through_the_lock() {
        let cfg = cfg(800, false);
        let game = Arc::new(Mutex::new(PuzzleGame::with_seed(&cfg, 3)));
        let token = CancellationToken::new();
        let handle = {
            let (game, token, cfg) = (game.clone(), token.clone(), cfg.clone());
            tokio::spawn(async move { run_overlay(game, &cfg, token, |_| {}).await })
        };
        tokio::time::sleep(Duration::from_millis(60)).await;
        {
            let mut g = game.lock().unwrap();
            assert!(g.pause());
            assert_eq!(g.move_left(), StepOutcome::Ignored);
        }
        tokio::time::sleep(Duration::from_millis(2_000)).await;
        assert_eq!(game.lock().unwrap().current().unwrap().position.y, 0);
        token.cancel();
        handle.await.unwrap();
    }
}
