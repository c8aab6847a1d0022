use std::cell::RefCell;
use std::rc::Rc;

use audiomux::client::{ClientId, FifoClient};
use audiomux::config::AudioDefaults;
use audiomux::engine::DeviceRegistry;
use audiomux::hal::mock::{MockBackend, MockDeviceConfig};
use audiomux::hal::Mode;
use audiomux::reactor::{ManualReactor, WatchKey};

const DSP: &str = "/dev/dsp";

/// Mono, 8-frame fragments, 4 fragments of buffer
fn small_defaults() -> AudioDefaults {
    AudioDefaults {
        channels: 1,
        fragment_size_log2: 4,
        fragment_count: 4,
        buffer_fragments: 4,
        ..AudioDefaults::default()
    }
}

struct Rig {
    backend: MockBackend,
    reactor: ManualReactor,
    registry: DeviceRegistry,
}

impl Rig {
    fn new(config: MockDeviceConfig, defaults: AudioDefaults) -> Self {
        let backend = MockBackend::new();
        backend.add_device(DSP, config);
        let reactor = ManualReactor::new();
        let registry = DeviceRegistry::new(Rc::new(backend.clone()), Rc::new(reactor.clone()), defaults);
        Self {
            backend,
            reactor,
            registry,
        }
    }

    fn producer(&mut self, channel: usize) -> (Rc<RefCell<FifoClient>>, ClientId) {
        let client = FifoClient::new(Mode::Write, channel).shared();
        let id = self.registry.register(DSP, &FifoClient::as_shared(&client));
        self.registry.open(id, Mode::Write).unwrap();
        (client, id)
    }

    fn output_ready(&mut self) {
        self.registry.dispatch(&WatchKey::output(DSP));
    }

    fn write_armed(&self) -> bool {
        self.registry.device(DSP).unwrap().is_write_armed()
    }
}

#[test]
fn test_output_watch_starts_disarmed() {
    let mut rig = Rig::new(MockDeviceConfig::default(), small_defaults());
    let (producer, id) = rig.producer(0);
    assert!(!rig.write_armed());

    // Readiness before any producer signalled is ignored
    producer.borrow_mut().write(&[0.25; 8]);
    rig.backend.set_output_free(DSP, 4);
    rig.output_ready();
    assert!(rig.backend.written(DSP).is_empty());

    rig.registry.audio_to_write_available(id);
    assert!(rig.write_armed());
    assert_eq!(rig.reactor.is_enabled(&WatchKey::output(DSP)), Some(true));
}

#[test]
fn test_mixing_saturates_after_summing() {
    let mut rig = Rig::new(MockDeviceConfig::default(), small_defaults());
    let (a, id) = rig.producer(0);
    let (b, _) = rig.producer(0);

    a.borrow_mut().write(&[1.0, 1.0, -1.0, -1.0, 0.5, 0.5, 0.0, 0.75]);
    b.borrow_mut().write(&[1.0, 0.0, -1.0, 0.0, 0.5, -0.5, 0.0, -0.25]);
    rig.backend.set_output_free(DSP, 4);
    rig.registry.audio_to_write_available(id);
    rig.output_ready();

    assert_eq!(
        rig.backend.written(DSP),
        vec![32767, 32767, -32767, -32767, 32766, 0, 0, 16383]
    );
}

#[test]
fn test_stereo_producers_fill_their_own_channel() {
    let defaults = AudioDefaults {
        channels: 2,
        ..small_defaults()
    };
    let mut rig = Rig::new(MockDeviceConfig::default(), defaults);
    let (left, id) = rig.producer(0);
    let (right, _) = rig.producer(1);

    // 16-byte fragments hold 4 stereo frames
    left.borrow_mut().write(&[0.5; 4]);
    right.borrow_mut().write(&[-0.5; 4]);
    rig.backend.set_output_free(DSP, 4);
    rig.registry.audio_to_write_available(id);
    rig.output_ready();

    assert_eq!(
        rig.backend.written(DSP),
        vec![16383, -16383, 16383, -16383, 16383, -16383, 16383, -16383]
    );
}

#[test]
fn test_slowest_producer_bounds_the_write() {
    // 20-byte fragments: 10 mono frames each
    let config = MockDeviceConfig {
        fragment_bytes: Some(20),
        fragments_total: Some(8),
        ..MockDeviceConfig::default()
    };
    let mut rig = Rig::new(config, small_defaults());
    let (a, id) = rig.producer(0);
    let (b, _) = rig.producer(0);

    a.borrow_mut().write(&[0.1; 10]);
    b.borrow_mut().write(&[0.1; 100]);
    rig.backend.set_output_free(DSP, 5);
    rig.registry.audio_to_write_available(id);
    rig.output_ready();

    assert_eq!(rig.backend.write_sizes(DSP), vec![10]);
    assert_eq!(a.borrow().queued(), 0);
    assert_eq!(b.borrow().queued(), 90);
    assert!(rig.write_armed());
}

#[test]
fn test_partial_fragment_waits_without_flush() {
    let mut rig = Rig::new(MockDeviceConfig::default(), small_defaults());
    let (producer, id) = rig.producer(0);

    producer.borrow_mut().write(&[0.1; 5]);
    rig.backend.set_output_free(DSP, 4);
    rig.registry.audio_to_write_available(id);
    rig.output_ready();

    assert!(rig.backend.written(DSP).is_empty());
    assert_eq!(producer.borrow().queued(), 5);
    assert!(!rig.write_armed());
}

#[test]
fn test_flush_pads_final_fragment_with_silence() {
    let mut rig = Rig::new(MockDeviceConfig::default(), small_defaults());
    let (producer, id) = rig.producer(0);

    producer.borrow_mut().write(&[0.5; 3]);
    producer.borrow_mut().flush();
    rig.backend.set_output_free(DSP, 4);
    rig.registry.audio_to_write_available(id);
    rig.output_ready();

    assert_eq!(rig.backend.write_sizes(DSP), vec![8]);
    assert_eq!(
        rig.backend.written(DSP),
        vec![16383, 16383, 16383, 0, 0, 0, 0, 0]
    );
    assert_eq!(producer.borrow().queued(), 0);
    assert!(rig.write_armed());

    // Nothing left: the next readiness disarms without writing
    rig.output_ready();
    assert_eq!(rig.backend.write_sizes(DSP), vec![8]);
    assert!(!rig.write_armed());
}

#[test]
fn test_flush_requires_every_producer() {
    let mut rig = Rig::new(MockDeviceConfig::default(), small_defaults());
    let (a, id) = rig.producer(0);
    let (b, _) = rig.producer(0);

    a.borrow_mut().write(&[0.1; 3]);
    a.borrow_mut().flush();
    b.borrow_mut().write(&[0.1; 3]);
    rig.backend.set_output_free(DSP, 4);
    rig.registry.audio_to_write_available(id);
    rig.output_ready();

    assert!(rig.backend.written(DSP).is_empty());
    assert!(!rig.write_armed());

    b.borrow_mut().flush();
    rig.registry.audio_to_write_available(id);
    rig.output_ready();
    assert_eq!(rig.backend.write_sizes(DSP), vec![8]);
}

#[test]
fn test_idle_producers_disarm_output() {
    let mut rig = Rig::new(MockDeviceConfig::default(), small_defaults());
    let (_producer, id) = rig.producer(0);

    rig.backend.set_output_free(DSP, 4);
    rig.registry.audio_to_write_available(id);
    rig.output_ready();

    assert!(rig.backend.write_sizes(DSP).is_empty());
    assert!(!rig.write_armed());
}

#[test]
fn test_samples_round_trip_within_one_step() {
    let mut rig = Rig::new(MockDeviceConfig::default(), small_defaults());
    let (producer, id) = rig.producer(0);

    let expected: Vec<i16> = vec![-32767, -20000, -1, 0, 1, 1234, 20000, 32767];
    let samples: Vec<f32> = expected.iter().map(|&s| s as f32 / 32767.0).collect();
    producer.borrow_mut().write(&samples);
    rig.backend.set_output_free(DSP, 4);
    rig.registry.audio_to_write_available(id);
    rig.output_ready();

    let written = rig.backend.written(DSP);
    assert_eq!(written.len(), expected.len());
    for (out, want) in written.iter().zip(&expected) {
        assert!((*out as i32 - *want as i32).abs() <= 1, "{} vs {}", out, want);
    }
}

#[test]
fn test_full_device_keeps_watch_armed() {
    let mut rig = Rig::new(MockDeviceConfig::default(), small_defaults());
    let (producer, id) = rig.producer(0);

    producer.borrow_mut().write(&[0.2; 64]);
    rig.backend.set_output_free(DSP, 4);
    rig.registry.audio_to_write_available(id);
    rig.output_ready();

    // One full buffer, then the device has no space left
    assert_eq!(rig.backend.write_sizes(DSP), vec![32]);
    assert_eq!(rig.backend.output_free(DSP), 0);
    assert!(rig.write_armed());

    rig.backend.set_output_free(DSP, 4);
    rig.output_ready();
    assert_eq!(rig.backend.write_sizes(DSP), vec![32, 32]);
    assert_eq!(producer.borrow().queued(), 0);
}

#[test]
fn test_write_error_aborts_pass() {
    let mut rig = Rig::new(MockDeviceConfig::default(), small_defaults());
    let (producer, id) = rig.producer(0);

    producer.borrow_mut().write(&[0.2; 8]);
    rig.backend.set_output_free(DSP, 4);
    rig.backend.set_fail_write(DSP, true);
    rig.registry.audio_to_write_available(id);
    rig.output_ready();

    assert!(rig.backend.written(DSP).is_empty());
    assert!(rig.registry.device(DSP).unwrap().is_open());
}

#[test]
fn test_short_write_aborts_pass() {
    let mut rig = Rig::new(MockDeviceConfig::default(), small_defaults());
    let (producer, id) = rig.producer(0);

    producer.borrow_mut().write(&[0.2; 32]);
    rig.backend.set_output_free(DSP, 4);
    rig.backend.set_short_write(DSP, true);
    rig.registry.audio_to_write_available(id);
    rig.output_ready();

    assert_eq!(rig.backend.write_sizes(DSP), vec![16]);
}

#[test]
fn test_out_of_range_producer_is_skipped() {
    let mut rig = Rig::new(MockDeviceConfig::default(), small_defaults());
    let (stray, id) = rig.producer(3);

    stray.borrow_mut().write(&[0.5; 8]);
    rig.backend.set_output_free(DSP, 4);
    rig.registry.audio_to_write_available(id);
    rig.output_ready();

    assert!(rig.backend.written(DSP).is_empty());
    assert_eq!(stray.borrow().queued(), 8);
}

#[test]
fn test_dropped_producer_is_ignored() {
    let mut rig = Rig::new(MockDeviceConfig::default(), small_defaults());
    let (gone, id) = rig.producer(0);
    let (kept, _) = rig.producer(0);

    gone.borrow_mut().write(&[0.9; 8]);
    drop(gone);
    kept.borrow_mut().write(&[0.5; 8]);
    rig.backend.set_output_free(DSP, 4);
    rig.registry.audio_to_write_available(id);
    rig.output_ready();

    assert_eq!(rig.backend.written(DSP), vec![16383; 8]);
}

#[test]
fn test_prebuffer_holds_back_first_fragments() {
    let defaults = AudioDefaults {
        prebuffer_fragments: 2,
        ..small_defaults()
    };
    let mut rig = Rig::new(MockDeviceConfig::default(), defaults);
    let (producer, id) = rig.producer(0);

    producer.borrow_mut().write(&[0.1; 8]);
    rig.backend.set_output_free(DSP, 4);
    rig.registry.audio_to_write_available(id);
    rig.output_ready();
    assert!(rig.backend.written(DSP).is_empty());
    assert!(!rig.write_armed());

    producer.borrow_mut().write(&[0.1; 8]);
    rig.registry.audio_to_write_available(id);
    rig.output_ready();
    assert_eq!(rig.backend.write_sizes(DSP), vec![16]);

    // Streaming: single fragments go straight out
    producer.borrow_mut().write(&[0.1; 8]);
    rig.registry.audio_to_write_available(id);
    rig.output_ready();
    assert_eq!(rig.backend.write_sizes(DSP), vec![16, 8]);
}

#[test]
fn test_flush_samples_skips_prebuffer() {
    let defaults = AudioDefaults {
        prebuffer_fragments: 2,
        ..small_defaults()
    };
    let mut rig = Rig::new(MockDeviceConfig::default(), defaults);
    let (producer, id) = rig.producer(0);

    producer.borrow_mut().write(&[0.1; 8]);
    rig.backend.set_output_free(DSP, 4);
    rig.registry.flush_samples(id);
    assert!(rig.write_armed());
    rig.output_ready();

    assert_eq!(rig.backend.write_sizes(DSP), vec![8]);
}

#[test]
fn test_flush_tail_at_capacity_stays_fragment_aligned() {
    let mut rig = Rig::new(MockDeviceConfig::default(), small_defaults());
    let (producer, id) = rig.producer(0);

    // 30 of 32 buffer frames, padded to exactly four fragments
    producer.borrow_mut().write(&[0.25; 30]);
    producer.borrow_mut().flush();
    rig.backend.set_output_free(DSP, 4);
    rig.registry.audio_to_write_available(id);
    rig.output_ready();

    assert_eq!(rig.backend.write_sizes(DSP), vec![32]);
    let written = rig.backend.written(DSP);
    assert!(written[..30].iter().all(|&s| s == 8191));
    assert_eq!(&written[30..], &[0, 0]);
}
