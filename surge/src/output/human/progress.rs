use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use indicatif::{MultiProgress, ProgressBar, ProgressDrawTarget, ProgressStyle};

/// One bar per scenario on stderr; scenarios without a known length get a spinner.
pub(crate) struct HumanProgress {
    inner: Mutex<Inner>,
}

impl HumanProgress {
    pub(crate) fn new() -> Self {
        let multi = MultiProgress::new();
        multi.set_draw_target(ProgressDrawTarget::stderr_with_hz(5));

        Self {
            inner: Mutex::new(Inner {
                multi,
                bars: HashMap::new(),
            }),
        }
    }

    pub(crate) fn update(
        &self,
        scenario: &str,
        total_duration: Option<Duration>,
        elapsed: Duration,
        message: String,
    ) {
        let mut inner = self
            .inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        let pb = inner.get_or_create_bar(scenario, total_duration.is_some());
        pb.set_message(message);

        match total_duration {
            Some(total) => {
                let total_ms = u64::try_from(total.as_millis()).unwrap_or(u64::MAX);
                let elapsed_ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX);
                pb.set_length(total_ms);
                pb.set_position(elapsed_ms.min(total_ms));
            }
            None => pb.tick(),
        }
    }

    pub(crate) fn finish(&self) {
        let mut inner = self
            .inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        for (_, pb) in inner.bars.drain() {
            pb.finish_and_clear();
        }
        let _ = inner.multi.clear();
    }
}

struct Inner {
    multi: MultiProgress,
    bars: HashMap<String, ProgressBar>,
}

impl Inner {
    fn get_or_create_bar(&mut self, scenario: &str, bounded: bool) -> &ProgressBar {
        let multi = &self.multi;
        self.bars.entry(scenario.to_string()).or_insert_with(|| {
            if bounded {
                let pb = multi.add(ProgressBar::new(0));
                pb.set_style(bar_style());
                pb.set_prefix(scenario.to_string());
                pb
            } else {
                let pb = multi.add(ProgressBar::new_spinner());
                pb.set_style(spinner_style());
                pb.set_prefix(scenario.to_string());
                pb.enable_steady_tick(Duration::from_millis(120));
                pb
            }
        })
    }
}

fn bar_style() -> ProgressStyle {
    ProgressStyle::with_template("{prefix} [ {bar:20.cyan/blue} ] {percent:>3}% {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█░")
}

fn spinner_style() -> ProgressStyle {
    ProgressStyle::with_template("{prefix} {spinner} {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_spinner())
}
