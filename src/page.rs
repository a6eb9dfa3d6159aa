use std::cell::Cell;
use std::rc::Rc;

use crate::counter::Counter;
use crate::dom::{Dom, NodeId};
use crate::{Error, Result};

/// Poll delay used when `auto_update` is given no delay or zero.
pub const DEFAULT_POLL_DELAY_MS: u64 = 500;

/// Handle to a counter installed on a [`Page`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CounterId(usize);

impl CounterId {
    pub fn index(self) -> usize {
        self.0
    }
}

/// Shared cancellation flag for a poll loop.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Rc<Cell<bool>>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.set(true);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.get()
    }
}

/// Returned by [`Page::auto_update`]. One timer id is used for the whole
/// lifetime of the loop.
#[derive(Debug, Clone)]
pub struct PollHandle {
    timer_id: i64,
    token: CancelToken,
}

impl PollHandle {
    pub fn timer_id(&self) -> i64 {
        self.timer_id
    }

    pub fn token(&self) -> &CancelToken {
        &self.token
    }
}

#[derive(Debug, Clone)]
struct ScheduledTask {
    id: i64,
    due_at: i64,
    order: i64,
    interval_ms: i64,
    counter: CounterId,
    token: CancelToken,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingTimer {
    pub id: i64,
    pub due_at: i64,
    pub order: i64,
    pub interval_ms: Option<i64>,
}

/// Single-threaded document host: owns the DOM, the installed counters, a
/// virtual clock with its timer queue, and the document-ready latch.
pub struct Page {
    dom: Dom,
    counters: Vec<Box<dyn Counter>>,
    task_queue: Vec<ScheduledTask>,
    ready: bool,
    ready_waiters: Vec<CounterId>,
    now_ms: i64,
    timer_step_limit: usize,
    next_timer_id: i64,
    next_task_order: i64,
    trace: bool,
    trace_timers: bool,
    trace_counters: bool,
    trace_logs: Vec<String>,
    trace_log_limit: usize,
    trace_forward: bool,
}

impl Page {
    pub fn from_html(html: &str) -> Result<Self> {
        Ok(Self::from_dom(Dom::parse(html)?))
    }

    pub fn from_dom(dom: Dom) -> Self {
        Self {
            dom,
            counters: Vec::new(),
            task_queue: Vec::new(),
            ready: false,
            ready_waiters: Vec::new(),
            now_ms: 0,
            timer_step_limit: 10_000,
            next_timer_id: 1,
            next_task_order: 0,
            trace: false,
            trace_timers: true,
            trace_counters: true,
            trace_logs: Vec::new(),
            trace_log_limit: 10_000,
            trace_forward: true,
        }
    }

    pub fn dom(&self) -> &Dom {
        &self.dom
    }

    pub fn enable_trace(&mut self, enabled: bool) {
        self.trace = enabled;
    }

    pub fn take_trace_logs(&mut self) -> Vec<String> {
        std::mem::take(&mut self.trace_logs)
    }

    /// Also emit trace lines as `tracing` debug events.
    pub fn set_trace_forwarding(&mut self, enabled: bool) {
        self.trace_forward = enabled;
    }

    pub fn set_trace_timers(&mut self, enabled: bool) {
        self.trace_timers = enabled;
    }

    pub fn set_trace_counters(&mut self, enabled: bool) {
        self.trace_counters = enabled;
    }

    pub fn set_trace_log_limit(&mut self, max_entries: usize) -> Result<()> {
        if max_entries == 0 {
            return Err(Error::Config(
                "set_trace_log_limit requires at least 1 entry".into(),
            ));
        }
        self.trace_log_limit = max_entries;
        while self.trace_logs.len() > self.trace_log_limit {
            self.trace_logs.remove(0);
        }
        Ok(())
    }

    pub fn set_timer_step_limit(&mut self, max_steps: usize) -> Result<()> {
        if max_steps == 0 {
            return Err(Error::Config(
                "set_timer_step_limit requires at least 1 step".into(),
            ));
        }
        self.timer_step_limit = max_steps;
        Ok(())
    }

    pub fn install<C: Counter + 'static>(&mut self, counter: C) -> CounterId {
        let id = CounterId(self.counters.len());
        self.trace_counter_line(format!(
            "[counter] install id={} kind={}",
            id.0,
            counter.kind()
        ));
        self.counters.push(Box::new(counter));
        id
    }

    pub fn counter(&self, id: CounterId) -> Result<&dyn Counter> {
        self.counters
            .get(id.0)
            .map(|counter| counter.as_ref())
            .ok_or(Error::UnknownCounter(id.0))
    }

    /// Recounts once and re-renders the counter's messages.
    pub fn update(&mut self, id: CounterId) -> Result<()> {
        let counter = self
            .counters
            .get_mut(id.0)
            .ok_or(Error::UnknownCounter(id.0))?;
        counter.update(&mut self.dom)?;
        let line = format!(
            "[counter] update id={} kind={} updates={} done={} counts={:?}",
            id.0,
            counter.kind(),
            counter.updates(),
            counter.is_done(),
            counter.counts()
        );
        self.trace_counter_line(line);
        Ok(())
    }

    /// Updates now, then every `delay_ms` (default 500) until the counter is
    /// done or the returned handle is cancelled.
    pub fn auto_update(&mut self, id: CounterId, delay_ms: Option<u64>) -> Result<PollHandle> {
        let delay_ms = match delay_ms {
            None | Some(0) => DEFAULT_POLL_DELAY_MS,
            Some(delay_ms) => delay_ms,
        };
        let interval_ms = i64::try_from(delay_ms)
            .map_err(|_| Error::Timer(format!("poll delay out of range: {delay_ms}")))?;

        self.update(id)?;

        let handle = PollHandle {
            timer_id: self.allocate_timer_id(),
            token: CancelToken::new(),
        };
        if self.counter(id)?.is_done() {
            self.trace_timer_line(format!(
                "[timer] poll id={} counter={} finished immediately",
                handle.timer_id, id.0
            ));
            return Ok(handle);
        }

        let due_at = self.now_ms.saturating_add(interval_ms);
        self.enqueue(ScheduledTask {
            id: handle.timer_id,
            due_at,
            order: 0,
            interval_ms,
            counter: id,
            token: handle.token.clone(),
        });
        self.trace_timer_line(format!(
            "[timer] schedule poll id={} counter={} due_at={} interval_ms={}",
            handle.timer_id, id.0, due_at, interval_ms
        ));
        Ok(handle)
    }

    /// Cancels the loop and drops its queued tick. Returns whether a tick was
    /// still pending.
    pub fn cancel_polling(&mut self, handle: &PollHandle) -> bool {
        handle.token.cancel();
        self.clear_timer(handle.timer_id)
    }

    /// Marks the counter done and renders the final messages once the document
    /// is ready. Runs immediately when it already is.
    pub fn done_when_ready(&mut self, id: CounterId) -> Result<()> {
        self.counter(id)?;
        if self.ready {
            return self.finish_counter(id);
        }
        self.ready_waiters.push(id);
        Ok(())
    }

    pub fn is_ready(&self) -> bool {
        self.ready
    }

    /// Fires the document-ready callbacks in registration order. Only the
    /// first call has any effect.
    pub fn finish_loading(&mut self) -> Result<()> {
        if self.ready {
            self.trace_line("[ready] finish_loading ignored (already ready)".into());
            return Ok(());
        }
        self.ready = true;
        let waiters = std::mem::take(&mut self.ready_waiters);
        self.trace_line(format!("[ready] finish_loading callbacks={}", waiters.len()));
        for id in waiters {
            self.finish_counter(id)?;
        }
        Ok(())
    }

    fn finish_counter(&mut self, id: CounterId) -> Result<()> {
        self.counters
            .get_mut(id.0)
            .ok_or(Error::UnknownCounter(id.0))?
            .mark_done();
        self.trace_line(format!("[ready] done counter={}", id.0));
        self.update(id)
    }

    pub fn now_ms(&self) -> i64 {
        self.now_ms
    }

    pub fn clear_timer(&mut self, timer_id: i64) -> bool {
        let before = self.task_queue.len();
        self.task_queue.retain(|task| task.id != timer_id);
        let existed = self.task_queue.len() != before;
        self.trace_timer_line(format!(
            "[timer] clear id={timer_id} existed={existed}"
        ));
        existed
    }

    pub fn clear_all_timers(&mut self) -> usize {
        let cleared = self.task_queue.len();
        self.task_queue.clear();
        self.trace_timer_line(format!("[timer] clear_all cleared={cleared}"));
        cleared
    }

    pub fn pending_timers(&self) -> Vec<PendingTimer> {
        let mut timers = self
            .task_queue
            .iter()
            .map(|task| PendingTimer {
                id: task.id,
                due_at: task.due_at,
                order: task.order,
                interval_ms: Some(task.interval_ms),
            })
            .collect::<Vec<_>>();
        timers.sort_by_key(|timer| (timer.due_at, timer.order));
        timers
    }

    pub fn advance_time(&mut self, delta_ms: i64) -> Result<()> {
        if delta_ms < 0 {
            return Err(Error::Timer(
                "advance_time requires non-negative milliseconds".into(),
            ));
        }
        let from = self.now_ms;
        self.now_ms = self.now_ms.saturating_add(delta_ms);
        let ran = self.run_due_timers_internal()?;
        self.trace_timer_line(format!(
            "[timer] advance delta_ms={} from={} to={} ran_due={}",
            delta_ms, from, self.now_ms, ran
        ));
        Ok(())
    }

    pub fn advance_time_to(&mut self, target_ms: i64) -> Result<()> {
        if target_ms < self.now_ms {
            return Err(Error::Timer(format!(
                "advance_time_to requires target >= now_ms (target={target_ms}, now_ms={})",
                self.now_ms
            )));
        }
        let from = self.now_ms;
        self.now_ms = target_ms;
        let ran = self.run_due_timers_internal()?;
        self.trace_timer_line(format!(
            "[timer] advance_to from={} to={} ran_due={}",
            from, self.now_ms, ran
        ));
        Ok(())
    }

    /// Runs every queued tick, moving the clock forward as needed. A poll loop
    /// that never finishes trips the step limit.
    pub fn flush(&mut self) -> Result<()> {
        let from = self.now_ms;
        let ran = self.run_timer_queue(None, true)?;
        self.trace_timer_line(format!(
            "[timer] flush from={} to={} ran={}",
            from, self.now_ms, ran
        ));
        Ok(())
    }

    pub fn run_next_timer(&mut self) -> Result<bool> {
        let Some(next_idx) = self.next_task_index(None) else {
            self.trace_timer_line("[timer] run_next none".into());
            return Ok(false);
        };

        let task = self.task_queue.remove(next_idx);
        if task.due_at > self.now_ms {
            self.now_ms = task.due_at;
        }
        self.execute_poll_task(task)?;
        Ok(true)
    }

    pub fn run_due_timers(&mut self) -> Result<usize> {
        let ran = self.run_due_timers_internal()?;
        self.trace_timer_line(format!(
            "[timer] run_due now_ms={} ran={}",
            self.now_ms, ran
        ));
        Ok(ran)
    }

    fn run_due_timers_internal(&mut self) -> Result<usize> {
        self.run_timer_queue(Some(self.now_ms), false)
    }

    fn run_timer_queue(&mut self, due_limit: Option<i64>, advance_clock: bool) -> Result<usize> {
        let mut steps = 0usize;
        while let Some(next_idx) = self.next_task_index(due_limit) {
            steps += 1;
            if steps > self.timer_step_limit {
                return Err(self.timer_step_limit_error(self.timer_step_limit, steps, due_limit));
            }
            let task = self.task_queue.remove(next_idx);
            if advance_clock && task.due_at > self.now_ms {
                self.now_ms = task.due_at;
            }
            self.execute_poll_task(task)?;
        }
        Ok(steps)
    }

    fn timer_step_limit_error(
        &self,
        max_steps: usize,
        steps: usize,
        due_limit: Option<i64>,
    ) -> Error {
        let due_limit_desc = due_limit
            .map(|value| value.to_string())
            .unwrap_or_else(|| "none".into());

        let next_task_desc = self
            .next_task_index(due_limit)
            .and_then(|idx| self.task_queue.get(idx))
            .map(|task| {
                format!(
                    "id={},counter={},due_at={},interval_ms={}",
                    task.id, task.counter.0, task.due_at, task.interval_ms
                )
            })
            .unwrap_or_else(|| "none".into());

        Error::Timer(format!(
            "exceeded max timer steps (poll loop never finished?): limit={max_steps}, steps={steps}, now_ms={}, due_limit={}, pending_tasks={}, next_task={}",
            self.now_ms,
            due_limit_desc,
            self.task_queue.len(),
            next_task_desc
        ))
    }

    fn next_task_index(&self, due_limit: Option<i64>) -> Option<usize> {
        self.task_queue
            .iter()
            .enumerate()
            .filter(|(_, task)| due_limit.is_none_or(|limit| task.due_at <= limit))
            .min_by_key(|(_, task)| (task.due_at, task.order))
            .map(|(idx, _)| idx)
    }

    fn execute_poll_task(&mut self, task: ScheduledTask) -> Result<()> {
        self.trace_timer_line(format!(
            "[timer] run id={} counter={} due_at={} now_ms={}",
            task.id, task.counter.0, task.due_at, self.now_ms
        ));
        if task.token.is_cancelled() {
            self.trace_timer_line(format!("[timer] skip id={} cancelled", task.id));
            return Ok(());
        }

        self.update(task.counter)?;

        if self.counter(task.counter)?.is_done() {
            self.trace_timer_line(format!("[timer] stop id={} counter done", task.id));
            return Ok(());
        }
        if task.token.is_cancelled() {
            self.trace_timer_line(format!("[timer] stop id={} cancelled", task.id));
            return Ok(());
        }

        let due_at = task.due_at.saturating_add(task.interval_ms);
        self.trace_timer_line(format!(
            "[timer] requeue id={} due_at={} interval_ms={}",
            task.id, due_at, task.interval_ms
        ));
        self.enqueue(ScheduledTask { due_at, ..task });
        Ok(())
    }

    fn allocate_timer_id(&mut self) -> i64 {
        let id = self.next_timer_id;
        self.next_timer_id += 1;
        id
    }

    fn enqueue(&mut self, mut task: ScheduledTask) {
        task.order = self.next_task_order;
        self.next_task_order += 1;
        self.task_queue.push(task);
    }

    pub fn set_inner_html(&mut self, selector: &str, html: &str) -> Result<()> {
        let target = self.select_one(selector)?;
        self.dom.set_inner_html(target, html)
    }

    /// Appends parsed markup after the existing children, the way streamed
    /// results arrive.
    pub fn append_html(&mut self, selector: &str, html: &str) -> Result<()> {
        let target = self.select_one(selector)?;
        self.dom.append_html(target, html)
    }

    pub fn text(&self, selector: &str) -> Result<String> {
        let target = self.select_one(selector)?;
        Ok(self.dom.text_content(target))
    }

    pub fn inner_html(&self, selector: &str) -> Result<String> {
        let target = self.select_one(selector)?;
        self.dom.inner_html(target)
    }

    pub fn assert_text(&self, selector: &str, expected: &str) -> Result<()> {
        let target = self.select_one(selector)?;
        let actual = self.dom.text_content(target);
        if actual != expected {
            return Err(Error::AssertionFailed {
                selector: selector.to_string(),
                expected: expected.to_string(),
                actual,
                dom_snippet: self.node_snippet(target),
            });
        }
        Ok(())
    }

    pub fn assert_exists(&self, selector: &str) -> Result<()> {
        let _ = self.select_one(selector)?;
        Ok(())
    }

    pub fn dump_dom(&self, selector: &str) -> Result<String> {
        let target = self.select_one(selector)?;
        Ok(self.dom.dump_node(target))
    }

    fn select_one(&self, selector: &str) -> Result<NodeId> {
        self.dom
            .query_selector(selector)?
            .ok_or_else(|| Error::SelectorNotFound(selector.to_string()))
    }

    fn node_snippet(&self, node_id: NodeId) -> String {
        truncate_chars(&self.dom.dump_node(node_id), 200)
    }

    fn trace_timer_line(&mut self, line: String) {
        if self.trace && self.trace_timers {
            self.trace_line(line);
        }
    }

    fn trace_counter_line(&mut self, line: String) {
        if self.trace && self.trace_counters {
            self.trace_line(line);
        }
    }

    fn trace_line(&mut self, line: String) {
        if self.trace {
            if self.trace_forward {
                tracing::debug!(target: "hit_counter", "{line}");
            }
            if self.trace_logs.len() >= self.trace_log_limit {
                self.trace_logs.remove(0);
            }
            self.trace_logs.push(line);
        }
    }
}

fn truncate_chars(value: &str, max_chars: usize) -> String {
    let mut chars = value.chars();
    let mut out = chars.by_ref().take(max_chars).collect::<String>();
    if chars.next().is_some() {
        out.push_str("...");
    }
    out
}
