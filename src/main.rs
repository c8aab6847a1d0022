#[cfg(any(target_os = "linux", target_os = "freebsd"))]
use std::cell::RefCell;
use std::path::Path;
use std::rc::Rc;

use anyhow::Result;
use audiomux::client::FifoClient;
use audiomux::config::AudioDefaults;
use audiomux::engine::DeviceRegistry;
use audiomux::hal::mock::MockBackend;
use audiomux::hal::Mode;
use audiomux::reactor::ManualReactor;

const DEMO_DEVICE: &str = "/dev/dsp";

fn sine(frequency: f32, sample_rate: u32, frames: usize, amplitude: f32) -> Vec<f32> {
    (0..frames)
        .map(|i| {
            let t = i as f32 / sample_rate as f32;
            amplitude * (2.0 * std::f32::consts::PI * frequency * t).sin()
        })
        .collect()
}

fn load_defaults() -> Result<AudioDefaults> {
    let defaults = match std::env::var_os("AUDIOMUX_CONFIG") {
        Some(path) => AudioDefaults::load(Path::new(&path))?,
        None => AudioDefaults {
            channels: 2,
            ..AudioDefaults::default()
        },
    };
    Ok(defaults.with_env())
}

/// Two tones on separate channels of one simulated device, plus a capture
/// client listening on the left channel.
fn mock_demo(defaults: AudioDefaults) -> Result<()> {
    println!("Shared device demo (mock backend)");
    println!("=================================\n");

    let backend = MockBackend::with_device(DEMO_DEVICE);
    let reactor = ManualReactor::new();
    let mut registry = DeviceRegistry::new(Rc::new(backend.clone()), Rc::new(reactor.clone()), defaults.clone());

    let left = FifoClient::new(Mode::Write, 0).shared();
    let right = FifoClient::new(Mode::Write, 1 % defaults.channels).shared();
    let mic = FifoClient::new(Mode::Read, 0).shared();

    let left_id = registry.register(DEMO_DEVICE, &FifoClient::as_shared(&left));
    let right_id = registry.register(DEMO_DEVICE, &FifoClient::as_shared(&right));
    let mic_id = registry.register(DEMO_DEVICE, &FifoClient::as_shared(&mic));
    println!("Registered 3 clients, use count {}", registry.use_count(DEMO_DEVICE));

    registry.open(left_id, Mode::Write)?;
    registry.open(mic_id, Mode::Read)?;
    if let Some(device) = registry.device(DEMO_DEVICE) {
        println!(
            "Device open for {:?}: {} frames per fragment, {} frames of scratch buffer",
            device.mode(),
            device.fragment_frames(),
            device.buffer_capacity_frames()
        );
    }

    let frames = defaults.sample_rate as usize / 10;
    left.borrow_mut().write(&sine(440.0, defaults.sample_rate, frames, 0.5));
    right.borrow_mut().write(&sine(660.0, defaults.sample_rate, frames, 0.5));
    left.borrow_mut().flush();
    right.borrow_mut().flush();
    registry.flush_samples(left_id);

    // Four whole fragments of capture data
    let fragment_samples = (1usize << defaults.fragment_size_log2) / 2;
    backend.push_input(DEMO_DEVICE, &vec![8192; 4 * fragment_samples]);

    let mut rounds = 0;
    loop {
        backend.set_output_free(DEMO_DEVICE, defaults.fragment_count as usize);
        let dispatched = reactor.dispatch_ready(&mut registry);
        rounds += 1;
        let queued = left.borrow().queued() + right.borrow().queued();
        if queued == 0 && backend.input_len(DEMO_DEVICE) == 0 || dispatched == 0 || rounds > 1000 {
            break;
        }
    }

    println!("\nAfter {} dispatch rounds:", rounds);
    println!("  samples written:  {}", backend.written(DEMO_DEVICE).len());
    println!("  samples captured: {}", mic.borrow().captured().len());

    for id in [left_id, right_id, mic_id] {
        registry.unregister(id);
    }
    println!("\nAll clients unregistered, devices left: {}", registry.len());
    Ok(())
}

/// Play a short tone on a real OSS device, driven by tokio readiness
#[cfg(any(target_os = "linux", target_os = "freebsd"))]
async fn oss_demo(path: String, defaults: AudioDefaults) -> Result<()> {
    use audiomux::hal::oss::OssBackend;
    use audiomux::reactor::{drive, TokioReactor};

    println!("Playing a 1 second tone on {}", path);

    let (reactor, events) = TokioReactor::new();
    let registry = Rc::new(RefCell::new(DeviceRegistry::new(
        Rc::new(OssBackend::new()),
        Rc::new(reactor),
        defaults.clone(),
    )));

    let tone = FifoClient::new(Mode::Write, 0).shared();
    let id = registry.borrow_mut().register(&path, &FifoClient::as_shared(&tone));
    registry.borrow_mut().open(id, Mode::Write)?;

    tone.borrow_mut()
        .write(&sine(440.0, defaults.sample_rate, defaults.sample_rate as usize, 0.3));
    tone.borrow_mut().flush();
    registry.borrow_mut().flush_samples(id);

    let driver = tokio::task::spawn_local(drive(Rc::clone(&registry), events));
    while tone.borrow().queued() > 0 {
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    }

    tone.borrow_mut().set_mode(Mode::None);
    registry.borrow_mut().unregister(id);
    driver.abort();
    println!("Done");
    Ok(())
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let defaults = load_defaults()?;
    defaults.validate()?;

    match std::env::args().nth(1) {
        #[cfg(any(target_os = "linux", target_os = "freebsd"))]
        Some(path) => {
            let local = tokio::task::LocalSet::new();
            local.run_until(oss_demo(path, defaults)).await
        }
        _ => mock_demo(defaults),
    }
}
