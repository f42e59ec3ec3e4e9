// Copyright (c) The Corio Project Authors.
// Licensed under the MIT License.

use std::cell::RefCell;

use crate::event_loop::EventLoop;
use crate::task::Task;

/// Accumulates member tasks sharing one output type and exposes waiter futures over their
/// completion, per spec §4.5 "Task group".
///
/// Waiters are plain `async fn`s rather than the original's generator-based handlers: each
/// awaits a [`futures::future::select_all`] over the still-pending members' completion signals,
/// then records the winner in `done` before returning it.
pub struct TaskGroup<T> {
    members: RefCell<Vec<Task<T>>>,
    done: RefCell<Vec<Task<T>>>,
}

impl<T: 'static> Default for TaskGroup<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: 'static> TaskGroup<T> {
    /// Creates an empty task group.
    #[must_use]
    pub fn new() -> Self {
        Self {
            members: RefCell::new(Vec::new()),
            done: RefCell::new(Vec::new()),
        }
    }

    /// Spawns `future` as a task on `event_loop` and adds it as a member.
    pub fn spawn<Fut>(&self, event_loop: &EventLoop, future: Fut) -> Task<T>
    where
        Fut: std::future::Future<Output = T> + 'static,
    {
        let task = event_loop.create_task(future);
        self.add(task.clone());
        task
    }

    /// Adds an already-spawned task as a member.
    pub fn add(&self, task: Task<T>) {
        self.members.borrow_mut().push(task);
    }

    /// Returns the number of members, done or not.
    #[must_use]
    pub fn member_count(&self) -> usize {
        self.members.borrow().len()
    }

    fn outstanding(&self) -> Vec<Task<T>> {
        let done = self.done.borrow();
        self.members
            .borrow()
            .iter()
            .filter(|member| !done.iter().any(|d| d.is_same_task(member)))
            .cloned()
            .collect()
    }

    /// Waits for the next member to transition to done, recording it in the group's `done` list
    /// and returning it. Returns `None` once every member is already done.
    pub async fn wait_next(&self) -> Option<Task<T>> {
        let outstanding = self.outstanding();
        if outstanding.is_empty() {
            return None;
        }

        let waiters = outstanding.iter().map(|task| Box::pin(task.wait()));
        let ((), index, _remaining) = futures::future::select_all(waiters).await;
        let finished = outstanding.into_iter().nth(index)?;
        self.done.borrow_mut().push(finished.clone());
        Some(finished)
    }

    /// Waits until any member is done, returning it. The member stays recorded in `done`.
    pub async fn wait_first(&self) -> Option<Task<T>> {
        if let Some(already) = self.done.borrow().first().cloned() {
            return Some(already);
        }
        self.wait_next().await
    }

    /// As [`TaskGroup::wait_first`], but removes the returned member from `done`.
    pub async fn wait_first_and_pop(&self) -> Option<Task<T>> {
        let task = self.wait_first().await?;
        self.done.borrow_mut().retain(|d| !d.is_same_task(&task));
        Some(task)
    }

    /// Waits until a member completes exceptionally (not cancelled, not successful), or every
    /// member has completed.
    pub async fn wait_exception(&self) -> Option<Task<T>> {
        loop {
            if let Some(failed) = self
                .done
                .borrow()
                .iter()
                .find(|task| !task.is_successful() && !task.is_cancelled())
                .cloned()
            {
                return Some(failed);
            }

            match self.wait_next().await {
                Some(task) if !task.is_successful() && !task.is_cancelled() => return Some(task),
                Some(_) => continue,
                None => return None,
            }
        }
    }

    /// As [`TaskGroup::wait_exception`], but removes the returned member from `done`.
    pub async fn wait_exception_and_pop(&self) -> Option<Task<T>> {
        let task = self.wait_exception().await?;
        self.done.borrow_mut().retain(|d| !d.is_same_task(&task));
        Some(task)
    }

    /// Waits until at least `count` members are done (capped at the member count).
    pub async fn wait_first_n(&self, count: usize) {
        let target = count.min(self.members.borrow().len());
        while self.done.borrow().len() < target {
            if self.wait_next().await.is_none() {
                break;
            }
        }
    }

    /// Waits until every member is done.
    pub async fn wait_all(&self) {
        while self.wait_next().await.is_some() {}
    }

    /// Cancels every member not yet done. Intended for an exceptional exit path (spec §4.5
    /// "`cancel_on_exception`").
    pub fn cancel_on_exception(&self, reason: Option<&str>) {
        for member in self.outstanding() {
            member.cancel(reason.map(str::to_owned));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::EventLoop;

    /// Drives `future` by alternating a no-op poll with event loop iterations, since members are
    /// only woken by the loop stepping their tasks, not by this test's own waker.
    fn drive<F: std::future::Future>(event_loop: &EventLoop, future: F) -> F::Output {
        let mut future = Box::pin(future);
        let waker = futures::task::noop_waker();
        let mut cx = std::task::Context::from_waker(&waker);

        loop {
            if let std::task::Poll::Ready(value) = future.as_mut().poll(&mut cx) {
                return value;
            }
            event_loop.run_main_iteration();
        }
    }

    #[test]
    fn wait_next_returns_members_in_completion_order() {
        let event_loop = EventLoop::new();
        let group = TaskGroup::new();

        let fast = event_loop.create_future::<u32>();
        let slow = event_loop.create_future::<u32>();
        let fast_for_task = fast.clone();
        let slow_for_task = slow.clone();

        let fast_task = group.spawn(&event_loop, async move { fast_for_task.await.unwrap() });
        let _slow_task = group.spawn(&event_loop, async move { slow_for_task.await.unwrap() });

        fast.set_result(1).unwrap();

        let winner = drive(&event_loop, group.wait_next()).expect("a member completed");
        assert!(winner.is_same_task(&fast_task));

        slow.set_result(2).unwrap();
    }

    #[test]
    fn wait_all_completes_once_every_member_is_done() {
        let event_loop = EventLoop::new();
        let group: TaskGroup<u32> = TaskGroup::new();

        group.spawn(&event_loop, async { 1 });
        group.spawn(&event_loop, async { 2 });

        drive(&event_loop, group.wait_all());
        assert_eq!(group.member_count(), 2);
    }

    #[test]
    fn wait_exception_skips_successful_members() {
        let event_loop = EventLoop::new();
        let group: TaskGroup<u32> = TaskGroup::new();

        group.spawn(&event_loop, async { 1 });
        let failing = group.spawn(&event_loop, async {
            panic!("unreachable: cancelled before polling to this point")
        });
        failing.cancel(None);

        let exceptional = drive(&event_loop, group.wait_exception());
        assert!(exceptional.is_none(), "a cancellation is not an exception");
    }

    #[test]
    fn cancel_on_exception_cancels_every_outstanding_member() {
        let event_loop = EventLoop::new();
        let group: TaskGroup<u32> = TaskGroup::new();

        let a = event_loop.create_future::<u32>();
        let b = event_loop.create_future::<u32>();
        let a_for_task = a.clone();
        let b_for_task = b.clone();

        let first = group.spawn(&event_loop, async move { a_for_task.await.unwrap() });
        let second = group.spawn(&event_loop, async move { b_for_task.await.unwrap() });

        group.cancel_on_exception(Some("body raised an error"));
        event_loop.run_main_iteration();

        assert!(first.is_cancelled());
        assert!(second.is_cancelled());
    }
}
