//! Tic pump: turns soundcard buffer completion into phase-synchronized
//! scheduler tics.
//!
//! One pump thread owns the soundcard. In single mode it steps every
//! strand driver itself; in super-threaded mode each strand gets a
//! dedicated worker and the pump enforces the per-tic three-phase barrier
//! across workers with rendezvous channels. Either way, all pre phases of
//! a tic complete before any run phase begins, and all run phases before
//! any post phase.

use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam_channel::{unbounded, Receiver, Sender, TryRecvError};
use parking_lot::Mutex;

use crate::config::ThreadMode;
use crate::context::SoundScope;
use crate::graph::{AudioId, Graph};
use crate::recall::{Phase, PHASES};
use crate::scheduler::driver::Driver;
use crate::soundcard::Soundcard;

pub(crate) enum PumpCommand {
    AddStrand(Box<Driver>),
    AddPass { audio: AudioId, scope: SoundScope },
    Stop { audio: AudioId, reply: Sender<bool> },
}

pub(crate) struct TicPump {
    commands: Option<Sender<PumpCommand>>,
    thread: Option<JoinHandle<()>>,
}

impl TicPump {
    pub fn spawn(mode: ThreadMode, sink: Box<dyn Soundcard>, graph: Arc<Mutex<Graph>>) -> Self {
        let (tx, rx) = unbounded();
        let thread = thread::Builder::new()
            .name("ripieno-tic-pump".into())
            .spawn(move || match mode {
                ThreadMode::Single => single_loop(sink, graph, rx),
                ThreadMode::SuperThreaded => super_loop(sink, graph, rx),
            })
            .expect("failed to spawn tic pump thread");
        Self {
            commands: Some(tx),
            thread: Some(thread),
        }
    }

    /// Returns the command when the pump already shut down (soundcard
    /// stream closed), so the caller can recover what it carried.
    pub fn send(&self, command: PumpCommand) -> core::result::Result<(), PumpCommand> {
        match self.commands.as_ref() {
            Some(tx) => tx.send(command).map_err(|e| e.0),
            None => Err(command),
        }
    }
}

impl Drop for TicPump {
    fn drop(&mut self) {
        // Disconnecting the command channel asks the pump to wind down.
        self.commands = None;
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

fn return_strand(driver: Driver, graph: &Mutex<Graph>) {
    let strand = driver.into_strand();
    let mut graph = graph.lock();
    for (id, runtime) in strand.into_inner() {
        if let Some(entry) = graph.audios.get_mut(id) {
            entry.runtime = Some(runtime);
        }
    }
}

// ---------------------------------------------------------------------
// Single mode: the pump thread steps every strand itself.
// ---------------------------------------------------------------------

struct Lane {
    members: Vec<AudioId>,
    driver: Driver,
}

fn single_loop(mut sink: Box<dyn Soundcard>, graph: Arc<Mutex<Graph>>, rx: Receiver<PumpCommand>) {
    let mut lanes: Vec<Lane> = Vec::new();
    let mut master: Vec<f32> = Vec::new();

    loop {
        loop {
            match rx.try_recv() {
                Ok(command) => apply_single(&mut lanes, &graph, command),
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    for lane in lanes {
                        let mut driver = lane.driver;
                        driver.stop();
                        return_strand(driver, &graph);
                    }
                    return;
                }
            }
        }

        if lanes.is_empty() {
            // Idle: block for the next command instead of consuming tics.
            match rx.recv() {
                Ok(command) => {
                    apply_single(&mut lanes, &graph, command);
                    continue;
                }
                Err(_) => return,
            }
        }

        if !sink.wait_tic() {
            tracing::debug!("soundcard stream closed, stopping all strands");
            for lane in lanes {
                let mut driver = lane.driver;
                driver.stop();
                return_strand(driver, &graph);
            }
            return;
        }

        for lane in &mut lanes {
            lane.driver.begin_tic();
        }
        for phase in PHASES {
            for lane in &mut lanes {
                lane.driver.run_phase(phase);
            }
        }
        master.clear();
        for lane in &mut lanes {
            let frame = lane.driver.end_tic();
            if master.len() < frame.len() {
                master.resize(frame.len(), 0.0);
            }
            for (m, s) in master.iter_mut().zip(frame.iter()) {
                *m += *s;
            }
        }
        sink.submit(&master);
    }
}

fn apply_single(lanes: &mut Vec<Lane>, graph: &Mutex<Graph>, command: PumpCommand) {
    match command {
        PumpCommand::AddStrand(driver) => {
            lanes.push(Lane {
                members: driver.audio_ids(),
                driver: *driver,
            });
        }
        PumpCommand::AddPass { audio, scope } => {
            match lanes.iter_mut().find(|l| l.members.contains(&audio)) {
                Some(lane) => {
                    lane.driver.begin_pass(scope);
                }
                None => tracing::warn!(?audio, "add-pass for an audio with no active strand"),
            }
        }
        PumpCommand::Stop { audio, reply } => {
            match lanes.iter().position(|l| l.members.contains(&audio)) {
                Some(index) => {
                    let lane = lanes.remove(index);
                    let mut driver = lane.driver;
                    driver.stop();
                    return_strand(driver, graph);
                    let _ = reply.send(true);
                }
                None => {
                    let _ = reply.send(false);
                }
            }
        }
    }
}

// ---------------------------------------------------------------------
// Super-threaded mode: a dedicated worker per strand, phase barrier in
// the pump.
// ---------------------------------------------------------------------

#[derive(Clone, Copy)]
enum WorkerMsg {
    BeginTic,
    Phase(Phase),
    EndTic,
    AddPass(SoundScope),
    Stop,
}

enum WorkerReply {
    Done,
    Frame(Vec<f32>),
    Stopped(Box<Driver>),
}

struct WorkerHandle {
    members: Vec<AudioId>,
    tx: Sender<WorkerMsg>,
    rx: Receiver<WorkerReply>,
    thread: JoinHandle<()>,
}

fn spawn_worker(driver: Box<Driver>) -> WorkerHandle {
    let members = driver.audio_ids();
    let (msg_tx, msg_rx) = unbounded();
    let (reply_tx, reply_rx) = unbounded();
    let thread = thread::Builder::new()
        .name("ripieno-strand-worker".into())
        .spawn(move || worker_loop(*driver, msg_rx, reply_tx))
        .expect("failed to spawn strand worker");
    WorkerHandle {
        members,
        tx: msg_tx,
        rx: reply_rx,
        thread,
    }
}

fn worker_loop(mut driver: Driver, rx: Receiver<WorkerMsg>, tx: Sender<WorkerReply>) {
    loop {
        match rx.recv() {
            Ok(WorkerMsg::BeginTic) => {
                driver.begin_tic();
                let _ = tx.send(WorkerReply::Done);
            }
            Ok(WorkerMsg::Phase(phase)) => {
                driver.run_phase(phase);
                let _ = tx.send(WorkerReply::Done);
            }
            Ok(WorkerMsg::EndTic) => {
                let frame = driver.end_tic().to_vec();
                let _ = tx.send(WorkerReply::Frame(frame));
            }
            Ok(WorkerMsg::AddPass(scope)) => {
                driver.begin_pass(scope);
                let _ = tx.send(WorkerReply::Done);
            }
            Ok(WorkerMsg::Stop) | Err(_) => {
                driver.stop();
                let _ = tx.send(WorkerReply::Stopped(Box::new(driver)));
                return;
            }
        }
    }
}

fn stop_worker(worker: WorkerHandle, graph: &Mutex<Graph>) {
    let _ = worker.tx.send(WorkerMsg::Stop);
    while let Ok(reply) = worker.rx.recv() {
        if let WorkerReply::Stopped(driver) = reply {
            return_strand(*driver, graph);
            break;
        }
    }
    let _ = worker.thread.join();
}

fn super_loop(mut sink: Box<dyn Soundcard>, graph: Arc<Mutex<Graph>>, rx: Receiver<PumpCommand>) {
    let mut workers: Vec<WorkerHandle> = Vec::new();
    let mut master: Vec<f32> = Vec::new();

    loop {
        loop {
            match rx.try_recv() {
                Ok(command) => apply_super(&mut workers, &graph, command),
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    for worker in workers {
                        stop_worker(worker, &graph);
                    }
                    return;
                }
            }
        }

        if workers.is_empty() {
            match rx.recv() {
                Ok(command) => {
                    apply_super(&mut workers, &graph, command);
                    continue;
                }
                Err(_) => return,
            }
        }

        if !sink.wait_tic() {
            tracing::debug!("soundcard stream closed, stopping all strands");
            for worker in workers {
                stop_worker(worker, &graph);
            }
            return;
        }

        // Rendezvous barrier: every worker finishes a phase before any
        // worker starts the next one.
        broadcast_and_wait(&workers, WorkerMsg::BeginTic);
        for phase in PHASES {
            broadcast_and_wait(&workers, WorkerMsg::Phase(phase));
        }
        master.clear();
        for worker in &workers {
            let _ = worker.tx.send(WorkerMsg::EndTic);
        }
        for worker in &workers {
            if let Ok(WorkerReply::Frame(frame)) = worker.rx.recv() {
                if master.len() < frame.len() {
                    master.resize(frame.len(), 0.0);
                }
                for (m, s) in master.iter_mut().zip(frame.iter()) {
                    *m += *s;
                }
            }
        }
        sink.submit(&master);
    }
}

fn broadcast_and_wait(workers: &[WorkerHandle], message: WorkerMsg) {
    for worker in workers {
        let _ = worker.tx.send(message);
    }
    for worker in workers {
        let _ = worker.rx.recv();
    }
}

fn apply_super(workers: &mut Vec<WorkerHandle>, graph: &Mutex<Graph>, command: PumpCommand) {
    match command {
        PumpCommand::AddStrand(driver) => workers.push(spawn_worker(driver)),
        PumpCommand::AddPass { audio, scope } => {
            match workers.iter().find(|w| w.members.contains(&audio)) {
                Some(worker) => {
                    let _ = worker.tx.send(WorkerMsg::AddPass(scope));
                    let _ = worker.rx.recv();
                }
                None => tracing::warn!(?audio, "add-pass for an audio with no active strand"),
            }
        }
        PumpCommand::Stop { audio, reply } => {
            match workers.iter().position(|w| w.members.contains(&audio)) {
                Some(index) => {
                    let worker = workers.remove(index);
                    stop_worker(worker, graph);
                    let _ = reply.send(true);
                }
                None => {
                    let _ = reply.send(false);
                }
            }
        }
    }
}
