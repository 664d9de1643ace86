//! Synchronization primitive tests

#![cfg(test)]

use super::*;

mod event_tests {
    use super::*;
    use crate::sync::wait::SignalKind;

    #[test]
    fn notification_event_latches() {
        let e = Event::notification();
        assert!(!e.is_set());
        e.set();
        assert!(e.is_set());
        // Notification signals survive consumption.
        assert_eq!(wait::wait_on(e.header()), Ok(()));
        assert!(e.is_set());
        e.clear();
        assert!(!e.is_set());
    }

    #[test]
    fn synchronization_event_is_consumed() {
        let e = Event::synchronization();
        e.set();
        assert_eq!(wait::wait_on(e.header()), Ok(()));
        assert!(!e.is_set());
    }

    #[test]
    fn wait_many_returns_first_signaled() {
        let a = WaitHeader::new(SignalKind::Notification);
        let b = WaitHeader::new(SignalKind::Notification);
        b.signal();
        assert_eq!(wait::wait_on_many(&[&a, &b]), Ok(1));
    }

    #[test]
    fn empty_wait_set_is_invalid() {
        assert_eq!(
            wait::wait_on_many(&[]),
            Err(crate::error::Status::InvalidArgument)
        );
    }
}

mod mutex_tests {
    use super::*;

    #[test]
    fn lock_and_relock() {
        let m = Mutex::new(5u32);
        {
            let mut guard = m.lock().unwrap();
            *guard += 1;
        }
        assert_eq!(*m.lock().unwrap(), 6);
    }

    #[test]
    fn try_lock_fails_while_held() {
        let m = Mutex::new(());
        let guard = m.try_lock().unwrap();
        assert!(m.try_lock().is_none());
        drop(guard);
        assert!(m.try_lock().is_some());
    }
}

mod semaphore_tests {
    use super::*;

    #[test]
    fn counts_down_and_up() {
        let s = Semaphore::new(2);
        assert!(s.try_acquire());
        assert!(s.try_acquire());
        assert!(!s.try_acquire());
        s.release();
        assert!(s.try_acquire());
        assert_eq!(s.count(), 0);
    }
}

mod pushlock_tests {
    use super::*;

    #[test]
    fn shared_then_exclusive() {
        let p = Pushlock::new();
        {
            let _a = p.lock_shared().unwrap();
            let _b = p.lock_shared().unwrap();
        }
        let _w = p.lock_exclusive().unwrap();
    }
}

mod spinlock_tests {
    use super::*;
    use crate::sync::irql::{self, Irql};

    #[test]
    fn guard_raises_irql() {
        let lock = SpinLock::new(0u32);
        assert_eq!(irql::current(), Irql::Passive);
        {
            let mut guard = lock.lock();
            *guard = 1;
            assert_eq!(irql::current(), Irql::Dispatch);
        }
        assert_eq!(irql::current(), Irql::Passive);
    }

    #[test]
    fn custom_irql_lock() {
        let lock = SpinLock::at_irql(Irql::High, ());
        let _guard = lock.lock();
        assert_eq!(irql::current(), Irql::High);
    }
}
