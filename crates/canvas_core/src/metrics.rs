use std::collections::HashMap;
use std::time::Instant;

#[derive(Debug, Clone, Default)]
pub struct FrameMetrics {
    pub cpu_frame_ms: f64,
    pub commands_flushed: u32,
    pub script_errors: u32,
    pub reload_count: u32,
}

/// Per-frame timing and counters collected by the host loop.
pub struct MetricsCollector {
    current_frame: FrameMetrics,
    frame_start: Option<Instant>,

    // Historical data for performance analysis
    frame_history: Vec<FrameMetrics>,
    max_history: usize,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self {
            current_frame: FrameMetrics::default(),
            frame_start: None,
            frame_history: Vec::new(),
            max_history: 300, // Keep 5 seconds of history at 60 FPS
        }
    }

    pub fn begin_frame(&mut self) {
        self.frame_start = Some(Instant::now());
        self.current_frame.commands_flushed = 0;
        self.current_frame.script_errors = 0;
    }

    pub fn end_frame(&mut self) {
        if let Some(start) = self.frame_start.take() {
            let frame_time = start.elapsed();
            self.current_frame.cpu_frame_ms = frame_time.as_secs_f64() * 1000.0;
        }

        self.frame_history.push(self.current_frame.clone());
        if self.frame_history.len() > self.max_history {
            self.frame_history.remove(0);
        }
    }

    pub fn record_flush(&mut self, command_count: u32) {
        self.current_frame.commands_flushed += command_count;
    }

    pub fn record_script_error(&mut self) {
        self.current_frame.script_errors += 1;
    }

    pub fn record_reload(&mut self) {
        self.current_frame.reload_count += 1;
    }

    pub fn current_metrics(&self) -> &FrameMetrics {
        &self.current_frame
    }

    pub fn get_performance_stats(&self) -> HashMap<String, f64> {
        if self.frame_history.is_empty() {
            return HashMap::new();
        }

        let mut stats = HashMap::new();
        let cpu_times: Vec<f64> = self.frame_history.iter().map(|f| f.cpu_frame_ms).collect();
        stats.insert("cpu_frame_mean_ms".to_string(), mean(&cpu_times));
        stats.insert("cpu_frame_p99_ms".to_string(), percentile(&cpu_times, 0.99));
        stats.insert(
            "cpu_frame_max_ms".to_string(),
            cpu_times.iter().copied().fold(0.0, f64::max),
        );

        let cmds: Vec<f64> = self.frame_history.iter().map(|f| f.commands_flushed as f64).collect();
        stats.insert("commands_mean".to_string(), mean(&cmds));
        stats.insert("commands_max".to_string(), cmds.iter().copied().fold(0.0, f64::max));

        stats
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() { 0.0 } else { values.iter().sum::<f64>() / values.len() as f64 }
}

fn percentile(values: &[f64], p: f64) -> f64 {
    if values.is_empty() { return 0.0; }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap());
    let index = ((sorted.len() - 1) as f64 * p).round() as usize;
    sorted[index.min(sorted.len() - 1)]
}
