//! UDP listener: one read loop feeding a worker pool, plus the response
//! path back out through the same socket.
//!
//! Datagrams are read strictly one after another, but every request is
//! processed on whichever pool routine picks it up. Processing of two
//! datagrams may therefore finish in either order, regardless of the order
//! they were read in.

use crate::binding::{DatagramReader, DatagramWriter};
use crate::config::Config;
use crate::error::{PoolError, ReadError, ServerError, WriteError};
use crate::handlers::{Handlers, ReqHandler, RespHandler};
use crate::message::{Complete, Request, Response};
use crate::pool::{current_routine, PoolConfig, Refused, RoutineId, Scheduler, Task, WorkPool};
use async_trait::async_trait;
use log::{debug, info, warn};
use std::fmt;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, RwLock};
use tokio::net::UdpSocket;
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;

/// Lifecycle of a listener. There is no way back out of `ShutDown`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenerState {
    Idle,
    Reading,
    Dispatching,
    ReadError,
    ShutDown,
}

/// Handle to a UDP listener. Cheap to clone; every clone drives the same
/// listener.
pub struct Udp<C> {
    inner: Arc<Inner<C>>,
}

struct Inner<C> {
    name: String,
    config: Config,
    handlers: Handlers<C>,
    scheduler: Arc<dyn Scheduler>,
    owns_scheduler: bool,

    state: watch::Sender<ListenerState>,
    closer: Notify,
    writer: RwLock<Option<Arc<dyn DatagramWriter>>>,
    local_addr: Mutex<Option<SocketAddr>>,
    terminal: Mutex<Option<ReadError>>,
    read_loop: Mutex<Option<JoinHandle<()>>>,
}

impl<C> Clone for Udp<C> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<C> fmt::Debug for Udp<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Udp")
            .field("name", &self.inner.name)
            .field("state", &self.state())
            .field("addr", &self.addr())
            .finish()
    }
}

impl<C> Udp<C> {
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    pub fn state(&self) -> ListenerState {
        *self.inner.state.borrow()
    }

    /// Local address of the listener socket once started
    pub fn addr(&self) -> Option<SocketAddr> {
        *lock(&self.inner.local_addr)
    }

    fn set_state(&self, state: ListenerState) {
        self.inner.state.send_replace(state);
    }

    fn writer(&self) -> Option<Arc<dyn DatagramWriter>> {
        match self.inner.writer.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    fn set_writer(&self, writer: Option<Arc<dyn DatagramWriter>>) {
        match self.inner.writer.write() {
            Ok(mut guard) => *guard = writer,
            Err(poisoned) => *poisoned.into_inner() = writer,
        }
    }
}

impl<C> Udp<C>
where
    C: Clone + Send + Sync + 'static,
{
    /// Creates a listener with its own work pool of `config.routines`
    /// routines. Must be called from within a tokio runtime.
    pub fn new(name: &str, config: Config, handlers: Handlers<C>) -> Result<Self, ServerError> {
        config.validate()?;
        let pool = WorkPool::new(
            name,
            PoolConfig::new(config.routines, config.queue_capacity),
        )?;
        Ok(Self::build(name, config, handlers, Arc::new(pool), true))
    }

    /// Creates a listener submitting to an existing scheduler. The
    /// scheduler is left running when the listener stops.
    pub fn with_scheduler(
        name: &str,
        config: Config,
        handlers: Handlers<C>,
        scheduler: Arc<dyn Scheduler>,
    ) -> Result<Self, ServerError> {
        config.validate()?;
        Ok(Self::build(name, config, handlers, scheduler, false))
    }

    fn build(
        name: &str,
        config: Config,
        handlers: Handlers<C>,
        scheduler: Arc<dyn Scheduler>,
        owns_scheduler: bool,
    ) -> Self {
        let (state, _) = watch::channel(ListenerState::Idle);
        Self {
            inner: Arc::new(Inner {
                name: name.to_string(),
                config,
                handlers,
                scheduler,
                owns_scheduler,
                state,
                closer: Notify::new(),
                writer: RwLock::new(None),
                local_addr: Mutex::new(None),
                terminal: Mutex::new(None),
                read_loop: Mutex::new(None),
            }),
        }
    }

    /// Binds the socket and starts the read loop. `ctx` is handed to every
    /// read and to every request processed by this listener.
    pub async fn start(&self, ctx: C) -> Result<(), ServerError> {
        let claimed = self.inner.state.send_if_modified(|state| {
            if *state == ListenerState::Idle {
                *state = ListenerState::Reading;
                true
            } else {
                false
            }
        });
        if !claimed {
            return Err(ServerError::AlreadyStarted);
        }

        let reader = match self.bind(&ctx).await {
            Ok(reader) => reader,
            Err(e) => {
                self.set_state(ListenerState::ShutDown);
                return Err(e);
            }
        };

        let handle = tokio::spawn(self.clone().read_loop(ctx, reader));
        *lock(&self.inner.read_loop) = Some(handle);
        Ok(())
    }

    async fn bind(&self, ctx: &C) -> Result<Box<dyn DatagramReader>, ServerError> {
        let socket = UdpSocket::bind(self.inner.config.addr)
            .await
            .map_err(ServerError::Bind)?;
        let local_addr = socket.local_addr().map_err(ServerError::Bind)?;

        let binding = self
            .inner
            .handlers
            .conn
            .bind(ctx, socket)
            .map_err(ServerError::Bind)?;

        *lock(&self.inner.local_addr) = Some(local_addr);
        self.set_writer(Some(binding.writer));
        info!("UDP {} listening on {}", self.inner.name, local_addr);
        Ok(binding.reader)
    }

    async fn read_loop(self, ctx: C, mut reader: Box<dyn DatagramReader>) {
        let terminal = loop {
            self.set_state(ListenerState::Reading);

            let result = tokio::select! {
                biased;
                _ = self.inner.closer.notified() => Err(ReadError::Closed),
                result = self.inner.handlers.req.read(&ctx, reader.as_mut()) => result,
            };

            let datagram = match result {
                Ok(datagram) => datagram,
                Err(e) if !e.is_terminal() => {
                    debug!("UDP {}: {}, reading again", self.inner.name, e);
                    tokio::task::yield_now().await;
                    continue;
                }
                Err(e) => break e,
            };

            self.set_state(ListenerState::Dispatching);
            debug!(
                "UDP {}: {} bytes from {}",
                self.inner.name, datagram.length, datagram.addr
            );

            let task = RequestTask {
                handler: Arc::clone(&self.inner.handlers.req),
                ctx: ctx.clone(),
                req: Request::new(self.clone(), datagram),
            };
            // A full queue holds the loop here; closing the listener still
            // gets through.
            let submitted = tokio::select! {
                biased;
                _ = self.inner.closer.notified() => None,
                result = self.inner.scheduler.submit(Box::new(task)) => Some(result),
            };
            match submitted {
                Some(Ok(())) => {}
                Some(Err(e)) => {
                    warn!("UDP {}: request dropped, {}", self.inner.name, e);
                    break ReadError::Closed;
                }
                None => {
                    debug!(
                        "UDP {}: closed while waiting for pool space, request dropped",
                        self.inner.name
                    );
                    break ReadError::Closed;
                }
            }
        };

        self.set_state(ListenerState::ReadError);
        drop(reader);
        self.set_writer(None);
        debug!("UDP {}: read loop ended: {}", self.inner.name, terminal);
        *lock(&self.inner.terminal) = Some(terminal);
        self.set_state(ListenerState::ShutDown);
    }

    /// Closes the listener. The pending read resolves as
    /// [`ReadError::Closed`], the read loop ends and, if the listener owns
    /// its pool, queued tasks are drained before this returns.
    ///
    /// May be called from [`ReqHandler::process`]; the calling routine then
    /// finishes its share of the queue after this returns. Must not be
    /// called from [`ReqHandler::read`], which runs on the read loop itself.
    pub async fn stop(&self) {
        let was_idle = self.inner.state.send_if_modified(|state| {
            if *state == ListenerState::Idle {
                *state = ListenerState::ShutDown;
                true
            } else {
                false
            }
        });

        if !was_idle {
            self.inner.closer.notify_one();
            self.wait_shut_down().await;
            let handle = lock(&self.inner.read_loop).take();
            if let Some(handle) = handle {
                let _ = handle.await;
            }
        }

        if self.inner.owns_scheduler {
            self.inner.scheduler.shutdown().await;
        }
        info!("UDP {} stopped", self.inner.name);
    }

    /// Waits for the listener to shut down and returns the error that ended
    /// the read loop. Only the first caller receives the error.
    pub async fn closed(&self) -> Option<ReadError> {
        self.wait_shut_down().await;
        lock(&self.inner.terminal).take()
    }

    async fn wait_shut_down(&self) {
        let mut state = self.inner.state.subscribe();
        loop {
            if *state.borrow_and_update() == ListenerState::ShutDown {
                return;
            }
            if state.changed().await.is_err() {
                return;
            }
        }
    }

    /// Writes the response on the caller's task and returns once the write
    /// and the completion callback have both run. The write outcome is only
    /// reported to the callback.
    pub async fn send(&self, ctx: C, resp: Response<C>) -> Result<(), ServerError> {
        let (task, _) = self.prepare(ctx, resp)?;
        task.deliver().await;
        Ok(())
    }

    /// Queues the response for a pool routine to write and returns without
    /// waiting for the write.
    ///
    /// Outside the pool this waits for queue space. A pool task never waits:
    /// if the queue is full the response is written on the calling routine
    /// before this returns.
    pub async fn async_send(&self, ctx: C, resp: Response<C>) -> Result<(), ServerError> {
        let (task, scheduler) = self.prepare(ctx, resp)?;

        let Some(routine) = current_routine() else {
            return scheduler.submit(Box::new(task)).await.map_err(not_running);
        };
        match scheduler.try_submit(Box::new(task)).await {
            Ok(()) => Ok(()),
            Err(Refused {
                task,
                reason: PoolError::Full,
            }) => {
                debug!(
                    "UDP {}: pool queue full, writing on routine {}",
                    self.inner.name, routine
                );
                task.run(routine).await;
                Ok(())
            }
            Err(Refused { reason, .. }) => Err(not_running(reason)),
        }
    }

    fn prepare(
        &self,
        ctx: C,
        mut resp: Response<C>,
    ) -> Result<(ResponseTask<C>, Arc<dyn Scheduler>), ServerError> {
        let writer = self.writer().ok_or(ServerError::NotRunning)?;
        let complete = resp.take_complete();
        resp.udp = Some(self.clone());
        resp.context = Some(ctx.clone());

        let task = ResponseTask {
            handler: Arc::clone(&self.inner.handlers.resp),
            ctx,
            resp,
            complete,
            writer,
        };
        Ok((task, Arc::clone(&self.inner.scheduler)))
    }
}

fn not_running(e: PoolError) -> ServerError {
    match e {
        PoolError::Closed => ServerError::NotRunning,
        other => ServerError::Pool(other),
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

struct RequestTask<C> {
    handler: Arc<dyn ReqHandler<C>>,
    ctx: C,
    req: Request<C>,
}

#[async_trait]
impl<C> Task for RequestTask<C>
where
    C: Send + Sync + 'static,
{
    async fn run(self: Box<Self>, _routine: RoutineId) {
        let RequestTask { handler, ctx, req } = *self;
        handler.process(&ctx, req).await;
    }
}

struct ResponseTask<C> {
    handler: Arc<dyn RespHandler<C>>,
    ctx: C,
    resp: Response<C>,
    complete: Option<Complete<C>>,
    writer: Arc<dyn DatagramWriter>,
}

impl<C> ResponseTask<C>
where
    C: Send + Sync + 'static,
{
    async fn deliver(self) {
        let ResponseTask {
            handler,
            ctx,
            resp,
            complete,
            writer,
        } = self;

        let completion = Completion { resp, complete };
        let result = handler
            .write(&ctx, &completion.resp, writer.as_ref())
            .await;
        completion.finish(result);
    }
}

#[async_trait]
impl<C> Task for ResponseTask<C>
where
    C: Send + Sync + 'static,
{
    async fn run(self: Box<Self>, _routine: RoutineId) {
        (*self).deliver().await;
    }
}

/// Fires the completion callback exactly once. If the write never reports
/// back (it panicked, or its future was dropped) the callback fires on drop
/// with [`WriteError::Incomplete`].
struct Completion<C> {
    resp: Response<C>,
    complete: Option<Complete<C>>,
}

impl<C> Completion<C> {
    fn finish(mut self, result: Result<(), WriteError>) {
        if let Some(complete) = self.complete.take() {
            complete(&self.resp, &result);
        }
    }
}

impl<C> Drop for Completion<C> {
    fn drop(&mut self) {
        if let Some(complete) = self.complete.take() {
            complete(&self.resp, &Err(WriteError::Incomplete));
        }
    }
}
