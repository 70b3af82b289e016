use candela_core::stream::{Abortable, Stoppable, drop_impl};

// Loom doubles implementing Abortable/Stoppable over loom atomics
mod model {
    use super::*;
    use loom::sync::Arc;
    use loom::sync::atomic::{AtomicBool, Ordering};

    #[derive(Clone)]
    pub struct Session {
        finished: Arc<AtomicBool>,
        aborted: Arc<AtomicBool>,
    }

    impl Session {
        pub fn new() -> (Self, Arc<AtomicBool>, Arc<AtomicBool>) {
            let finished = Arc::new(AtomicBool::new(false));
            let aborted = Arc::new(AtomicBool::new(false));
            (
                Self {
                    finished: finished.clone(),
                    aborted: aborted.clone(),
                },
                finished,
                aborted,
            )
        }

        pub fn mark_finished(&self) {
            self.finished.store(true, Ordering::SeqCst);
        }
    }

    impl Abortable for Session {
        fn abort(&mut self) {
            self.aborted.store(true, Ordering::SeqCst);
        }
        fn is_finished(&self) -> bool {
            self.finished.load(Ordering::SeqCst)
        }
    }

    #[derive(Clone)]
    pub struct Stop {
        sent: Arc<AtomicBool>,
    }

    impl Stop {
        pub fn new() -> (Self, Arc<AtomicBool>) {
            let sent = Arc::new(AtomicBool::new(false));
            (Self { sent: sent.clone() }, sent)
        }
    }

    impl Stoppable for Stop {
        fn send(self) {
            self.sent.store(true, Ordering::SeqCst);
        }
    }
}

#[test]
fn drop_signals_stop_and_aborts_unfinished_sessions() {
    loom::model(|| {
        use model::*;

        let (session, finished, aborted) = Session::new();
        let (stop, sent) = Stop::new();

        // The session may finish before or after drop_impl; let the loom
        // scheduler explore both orderings.
        let racer = session.clone();
        loom::thread::spawn(move || {
            racer.mark_finished();
        });

        let mut inner = Some(session);
        let mut stop_tx = Some(stop);
        drop_impl(&mut inner, &mut stop_tx);

        assert!(sent.load(loom::sync::atomic::Ordering::SeqCst));
        if !finished.load(loom::sync::atomic::Ordering::SeqCst) {
            assert!(aborted.load(loom::sync::atomic::Ordering::SeqCst));
        }
    });
}

#[test]
fn drop_leaves_finished_sessions_alone() {
    loom::model(|| {
        use model::*;

        let (session, _finished, aborted) = Session::new();
        let (stop, sent) = Stop::new();

        session.mark_finished();

        let mut inner = Some(session);
        let mut stop_tx = Some(stop);
        drop_impl(&mut inner, &mut stop_tx);

        assert!(sent.load(loom::sync::atomic::Ordering::SeqCst));
        assert!(!aborted.load(loom::sync::atomic::Ordering::SeqCst));
    });
}

#[test]
fn drop_aborts_when_no_stop_channel_exists() {
    loom::model(|| {
        use model::*;

        let (session, _finished, aborted) = Session::new();
        let mut inner = Some(session);
        let mut stop_tx: Option<model::Stop> = None;
        drop_impl(&mut inner, &mut stop_tx);

        assert!(aborted.load(loom::sync::atomic::Ordering::SeqCst));
    });
}
