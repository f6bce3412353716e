use core::{
    pin::pin,
    sync::atomic::{AtomicBool, AtomicUsize, Ordering},
    task::{Context, Poll},
};
use std::{future::Future, sync::Arc, thread};

use embedded_hal::spi::{MODE_0, MODE_3};
use futures::task::{waker, ArcWake};
use mt3620::spi::{Smmr, BUS_SPEED_MIN_MODE0};

use super::*;
use crate::{registry::Slot, session::Session, sim::SimPort};

fn trace_init() {
    use tracing_subscriber::{
        filter::{EnvFilter, LevelFilter},
        prelude::*,
    };
    let env = std::env::var("RUST_LOG").unwrap_or_default();
    let builder = EnvFilter::builder().with_default_directive(LevelFilter::INFO.into());
    let filter = if env.is_empty() {
        builder.parse("spim=trace").unwrap()
    } else {
        builder.parse_lossy(env)
    };

    let _res = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .with_thread_names(true)
        .without_time()
        .finish()
        .try_init();
}

fn sim() -> ([SimPort; 6], Registry<SimPort>) {
    trace_init();
    let ports = SimPort::array();
    let registry = Registry::new(ports.clone());
    (ports, registry)
}

/// Runs `f` while another thread stands in for the NVIC, delivering each
/// simulated port's interrupts to `registry`.
fn with_hardware<T>(registry: &Registry<SimPort>, ports: &[SimPort; 6], f: impl FnOnce() -> T) -> T {
    struct Done<'a>(&'a AtomicBool);
    impl Drop for Done<'_> {
        fn drop(&mut self) {
            self.0.store(true, Ordering::Release);
        }
    }

    let done = AtomicBool::new(false);
    thread::scope(|scope| {
        thread::Builder::new()
            .name("nvic".into())
            .spawn_scoped(scope, || {
                while !done.load(Ordering::Acquire) {
                    for (index, port) in ports.iter().enumerate() {
                        if port.take_irq() {
                            registry.handle_interrupt(Unit::isu(index).unwrap());
                        }
                    }
                    thread::yield_now();
                }
            })
            .unwrap();

        let _done = Done(&done);
        f()
    })
}

#[derive(Default)]
struct CountWakes(AtomicUsize);

impl ArcWake for CountWakes {
    fn wake_by_ref(arc_self: &Arc<Self>) {
        arc_self.0.fetch_add(1, Ordering::SeqCst);
    }
}

impl CountWakes {
    fn count(&self) -> usize {
        self.0.load(Ordering::SeqCst)
    }
}

#[test]
fn write_then_read_sends_opcode_big_endian() {
    let (ports, registry) = sim();
    ports[1].queue_miso(&[1, 2, 3, 4]);

    let mut buf = [0u8; 4];
    let res = with_hardware(&registry, &ports, || {
        let mut spi = registry.open(Unit::Isu1).unwrap();
        spi.write_then_read_blocking(&[0xAA, 0xBB], &mut buf)
    });

    assert_eq!(res, Ok(6));
    assert_eq!(buf, [1, 2, 3, 4]);

    let state = ports[1].state();
    assert_eq!(state.launches.len(), 1);
    let launch = &state.launches[0];
    assert!(launch.dma);
    assert!(launch.is_full_duplex());
    assert_eq!(launch.config.soar, 0xFFFF_AABB);
    assert_eq!(launch.opcode(), [0xAA, 0xBB]);
    assert_eq!(launch.mosi(), [0xFF; 4]);
}

#[test]
fn opcode_longer_than_four_bytes_spills_into_payload() {
    let (ports, registry) = sim();
    // the first byte is clocked in while the last command byte goes out.
    ports[0].queue_miso(&[0xEE, 1, 2, 3, 4]);

    let mut buf = [0u8; 4];
    let res = with_hardware(&registry, &ports, || {
        let mut spi = registry.open(Unit::Isu0).unwrap();
        spi.write_then_read_blocking(&[0x0B, 0x00, 0x10, 0x00, 0x00], &mut buf)
    });

    assert_eq!(res, Ok(9));
    assert_eq!(buf, [1, 2, 3, 4]);
    let state = ports[0].state();
    assert_eq!(state.launches[0].opcode(), [0x0B, 0x00, 0x10, 0x00]);
    assert_eq!(state.launches[0].mosi(), [0x00, 0xFF, 0xFF, 0xFF, 0xFF]);
}

#[test]
fn mode0_minimum_bus_speed() {
    let (_ports, registry) = sim();
    let mut spi = registry.open(Unit::Isu2).unwrap();

    assert_eq!(
        spi.configure(MODE_0, BUS_SPEED_MIN_MODE0 - 1),
        Err(Error::Unsupported)
    );
    assert_eq!(spi.configure(MODE_0, BUS_SPEED_MIN_MODE0), Ok(()));
    // the other modes may go slower, down to the divider's limit.
    assert_eq!(spi.configure(MODE_3, 20_000), Ok(()));
    assert_eq!(spi.configure(MODE_3, 19_000), Err(Error::Unsupported));
    assert_eq!(spi.configure(MODE_3, 0), Err(Error::InvalidParameter));
}

#[test]
fn bus_speed_rounds_down() {
    let (ports, registry) = sim();
    with_hardware(&registry, &ports, || {
        let mut spi = registry.open(Unit::Isu3).unwrap();
        spi.write_blocking(&[1]).unwrap();
        spi.configure(MODE_3, 1_000_000).unwrap();
        spi.write_blocking(&[2]).unwrap();
    });

    let state = ports[3].state();
    // 79.04 MHz / (38 + 2) = 1.976 MHz
    assert_eq!(state.launches[0].config.smmr.get(Smmr::RS_CLK_SEL), 38);
    assert!(!state.launches[0].config.smmr.get(Smmr::CPOL));
    // 79.04 MHz / (78 + 2) = 988 kHz
    assert_eq!(state.launches[1].config.smmr.get(Smmr::RS_CLK_SEL), 78);
    assert!(state.launches[1].config.smmr.get(Smmr::CPOL));
    assert!(state.launches[1].config.smmr.get(Smmr::CPHA));
}

#[test]
fn duplex_transfer_touches_no_hardware() {
    let (ports, registry) = sim();
    let mut spi = registry.open(Unit::Isu0).unwrap();

    let mut buf = [0u8; 2];
    let res = spi.transfer_sequential_blocking(&mut [Transfer::duplex(&[1, 2], &mut buf)]);
    assert_eq!(res, Err(Error::Unsupported));
    assert!(ports[0].state().launches.is_empty());

    assert_eq!(
        spi.transfer_sequential_blocking(&mut []),
        Err(Error::InvalidParameter)
    );
    assert_eq!(spi.read_blocking(&mut []), Err(Error::InvalidParameter));
    assert!(ports[0].state().launches.is_empty());
}

#[test]
fn second_transfer_while_pending_is_busy() {
    trace_init();
    let port = SimPort::new();
    let slot = Slot::new(port.clone());
    slot.with(|session| session.open(&SpimSettings::new(Unit::Isu0)))
        .unwrap();
    port.queue_miso(&[1, 2, 3]);

    let (mut first_buf, mut second_buf) = ([0u8; 3], [0u8; 3]);
    let mut first = [Transfer::read(&mut first_buf)];
    let mut second = [Transfer::read(&mut second_buf)];
    unsafe { slot.with(|session| session.start(&mut first)) }.unwrap();
    assert_eq!(
        unsafe { slot.with(|session| session.start(&mut second)) },
        Err(Error::Busy)
    );
    assert_eq!(slot.with(|session| session.take_result(None)), None);

    assert!(port.take_irq());
    assert!(slot.with(Session::on_interrupt).is_none());
    // a repeated interrupt does not complete it again.
    assert!(slot.with(Session::on_interrupt).is_none());
    assert_eq!(slot.with(|session| session.take_result(None)), Some(Ok(3)));

    drop((first, second));
    assert_eq!(first_buf, [1, 2, 3]);
    assert_eq!(second_buf, [0; 3]);
    assert_eq!(port.state().launches.len(), 1);
}

#[test]
fn async_transfer_wakes_once() {
    let (ports, registry) = sim();
    ports[4].queue_miso(&[7, 8, 9]);
    let mut spi = registry.open(Unit::Isu4).unwrap();

    let wakes = Arc::new(CountWakes::default());
    let waker = waker(wakes.clone());
    let mut cx = Context::from_waker(&waker);

    let mut buf = [0u8; 3];
    {
        let mut read = pin!(unsafe { spi.read(&mut buf) });
        assert_eq!(read.as_mut().poll(&mut cx), Poll::Pending);
        assert_eq!(wakes.count(), 0);

        assert!(ports[4].take_irq());
        registry.handle_interrupt(Unit::Isu4);
        assert_eq!(wakes.count(), 1);

        // spurious.
        registry.handle_interrupt(Unit::Isu4);
        assert_eq!(wakes.count(), 1);

        assert_eq!(read.as_mut().poll(&mut cx), Poll::Ready(Ok(3)));
    }
    assert_eq!(buf, [7, 8, 9]);
}

#[test]
fn async_transfer_with_executor() {
    let (ports, registry) = sim();
    ports[5].queue_miso(&(0..40).collect::<Vec<u8>>());

    let (mut a, mut b) = ([0u8; 20], [0u8; 20]);
    let res = with_hardware(&registry, &ports, || {
        let mut spi = registry.open(Unit::Isu5).unwrap();
        futures::executor::block_on(async {
            let mut transfers = [Transfer::read(&mut a), Transfer::read(&mut b)];
            unsafe { spi.transfer_sequential(&mut transfers).await }
        })
    });

    assert_eq!(res, Ok(40));
    assert_eq!(a.to_vec(), (0..20).collect::<Vec<u8>>());
    assert_eq!(b.to_vec(), (20..40).collect::<Vec<u8>>());
    assert_eq!(ports[5].state().launches.len(), 2);
}

#[test]
fn reads_are_globbed() {
    let (ports, registry) = sim();
    ports[0].queue_miso(&(0..35).collect::<Vec<u8>>());

    let (mut a, mut b, mut c, mut d) = ([0u8; 10], [0u8; 10], [0u8; 10], [0u8; 5]);
    let res = with_hardware(&registry, &ports, || {
        let mut spi = registry.open(Unit::Isu0).unwrap();
        spi.transfer_sequential_blocking(&mut [
            Transfer::read(&mut a),
            Transfer::read(&mut b),
            Transfer::read(&mut c),
            Transfer::read(&mut d),
        ])
    });

    assert_eq!(res, Ok(35));
    assert_eq!(a.to_vec(), (0..10).collect::<Vec<u8>>());
    assert_eq!(b.to_vec(), (10..20).collect::<Vec<u8>>());
    assert_eq!(c.to_vec(), (20..30).collect::<Vec<u8>>());
    assert_eq!(d.to_vec(), (30..35).collect::<Vec<u8>>());

    let state = ports[0].state();
    assert_eq!(state.launches.len(), 2);
    assert!(!state.launches[0].is_full_duplex());
    assert!(state.launches[0].mosi().is_empty());
}

#[test]
fn failure_abandons_the_rest_of_the_sequence() {
    let (ports, registry) = sim();
    ports[2].queue_miso(&[0x11; 96]);
    ports[2].fail_launch(1);

    let (mut a, mut b, mut c) = ([0u8; 32], [0u8; 32], [0u8; 32]);
    let res = with_hardware(&registry, &ports, || {
        let mut spi = registry.open(Unit::Isu2).unwrap();
        spi.transfer_sequential_blocking(&mut [
            Transfer::read(&mut a),
            Transfer::read(&mut b),
            Transfer::read(&mut c),
        ])
    });

    assert_eq!(res, Err(Error::TransferFailed { transferred: 32 }));
    assert_eq!(a, [0x11; 32]);
    assert_eq!(b, [0; 32]);
    assert_eq!(c, [0; 32]);
    assert_eq!(ports[2].state().launches.len(), 2);
}

#[test]
fn dma_residual_is_a_failure() {
    let (ports, registry) = sim();
    ports[1].set_dma_residual(0, 3);

    let res = with_hardware(&registry, &ports, || {
        let mut spi = registry.open(Unit::Isu1).unwrap();
        let res = spi.write_blocking(&[1, 2, 3]);
        // the unit is usable again afterwards.
        (res, spi.write_blocking(&[4]))
    });

    assert_eq!(res, (Err(Error::TransferFailed { transferred: 0 }), Ok(1)));
}

#[test]
fn transfers_without_dma() {
    let (ports, registry) = sim();
    ports[3].queue_miso(&[0x5A]);

    let settings = SpimSettings {
        dma: false,
        irq_priority: 5,
        ..SpimSettings::new(Unit::Isu3)
    };
    let mut buf = [0u8; 1];
    let res = with_hardware(&registry, &ports, || {
        let mut spi = registry.open_with(&settings).unwrap();
        spi.read_blocking(&mut buf)
    });

    assert_eq!(res, Ok(1));
    assert_eq!(buf, [0x5A]);
    let state = ports[3].state();
    assert!(!state.dma_mode);
    assert!(!state.launches[0].dma);
    // closed again when the handle was dropped.
    assert!(state.shut_down);
    assert_eq!(state.irq_enabled, None);
}

#[test]
fn irq_priority_out_of_range() {
    let (ports, registry) = sim();

    // 200 << 5 would wrap to 0, the highest priority.
    let settings = SpimSettings {
        irq_priority: 200,
        ..SpimSettings::new(Unit::Isu4)
    };
    assert_eq!(registry.open_with(&settings).err(), Some(Error::InvalidParameter));
    let settings = SpimSettings {
        irq_priority: SpimSettings::IRQ_PRIORITY_MAX + 1,
        ..settings
    };
    assert_eq!(registry.open_with(&settings).err(), Some(Error::InvalidParameter));
    assert_eq!(ports[4].state().irq_enabled, None);
    assert!(!ports[4].state().initialized);

    let settings = SpimSettings {
        irq_priority: SpimSettings::IRQ_PRIORITY_MAX,
        ..settings
    };
    let _spi = registry.open_with(&settings).unwrap();
    assert_eq!(ports[4].state().irq_enabled, Some(7));
}

#[test]
fn config_dma_while_dma_running_is_busy() {
    let (ports, registry) = sim();
    let mut spi = registry.open(Unit::Isu0).unwrap();
    assert_eq!(ports[0].state().irq_enabled, Some(SpimSettings::DEFAULT_IRQ_PRIORITY));

    ports[0].state().dma_running = true;
    // already enabled, so nothing to do.
    assert_eq!(spi.config_dma(true), Ok(()));
    assert_eq!(spi.config_dma(false), Err(Error::Busy));
    assert!(ports[0].state().dma_mode);

    ports[0].state().dma_running = false;
    assert_eq!(spi.config_dma(false), Ok(()));
    assert!(!ports[0].state().dma_mode);
}

#[test]
fn chip_select_is_programmed() {
    let (ports, registry) = sim();
    with_hardware(&registry, &ports, || {
        let mut spi = registry.open(Unit::Isu4).unwrap();
        spi.write_blocking(&[1]).unwrap();
        spi.select(ChipSelect::Line1).unwrap();
        spi.write_blocking(&[2]).unwrap();
        spi.select(ChipSelect::None).unwrap();
        spi.write_blocking(&[3]).unwrap();
    });

    let selected: Vec<u32> = ports[4]
        .state()
        .launches
        .iter()
        .map(|launch| launch.chip_select())
        .collect();
    assert_eq!(selected, [0, 1, 7]);
}

#[test]
fn open_close_reopen() {
    let (ports, registry) = sim();

    let spi = registry.open(Unit::Isu1).unwrap();
    assert_eq!(registry.open(Unit::Isu1).err(), Some(Error::Busy));
    assert!(ports[1].state().initialized);

    spi.close();
    {
        let state = ports[1].state();
        assert!(state.shut_down);
        assert_eq!(state.irq_enabled, None);
    }

    let _spi = registry.open(Unit::Isu1).unwrap();
    assert!(!ports[1].state().shut_down);
}

#[test]
fn dropping_the_future_halts_the_transfer() {
    let (ports, registry) = sim();
    ports[2].hold(true);
    let mut spi = registry.open(Unit::Isu2).unwrap();

    let wakes = Arc::new(CountWakes::default());
    let waker = waker(wakes.clone());
    let mut cx = Context::from_waker(&waker);

    let mut buf = [0u8; 8];
    {
        let mut read = pin!(unsafe { spi.read(&mut buf) });
        assert_eq!(read.as_mut().poll(&mut cx), Poll::Pending);
        assert!(ports[2].state().dma_running);
    }
    {
        let state = ports[2].state();
        assert_eq!(state.stops, 1);
        assert!(!state.dma_running);
    }
    // a late interrupt from the halted transaction is ignored.
    registry.handle_interrupt(Unit::Isu2);
    assert_eq!(wakes.count(), 0);

    ports[2].hold(false);
    ports[2].queue_miso(&[9; 8]);
    let res = with_hardware(&registry, &ports, || spi.read_blocking(&mut buf));
    assert_eq!(res, Ok(8));
    assert_eq!(buf, [9; 8]);
}

#[test]
fn half_duplex_writes() {
    let (ports, registry) = sim();
    let data: Vec<u8> = (1..=20).collect();

    with_hardware(&registry, &ports, || {
        let mut spi = registry.open(Unit::Isu5).unwrap();
        spi.write_blocking(&data).unwrap();
        spi.set_glob_policy(GlobPolicy {
            half_duplex_writes: true,
        })
        .unwrap();
        spi.write_blocking(&data).unwrap();
    });

    let state = ports[5].state();
    let (duplex, half) = (&state.launches[0], &state.launches[1]);
    assert!(duplex.is_full_duplex());
    assert_eq!(duplex.opcode(), [1, 2, 3, 4]);
    assert_eq!(duplex.mosi(), &data[4..]);

    assert!(!half.is_full_duplex());
    assert!(half.opcode().is_empty());
    assert_eq!(half.mosi(), &data[..]);
    assert_eq!(half.config.sdor[20], 0xFF);
}
