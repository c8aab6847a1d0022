//! Open Sound System backend (`/dev/dsp` style devices).

use std::fs::File;
use std::io::{Read, Write};
use std::os::fd::{AsRawFd, RawFd};

use anyhow::{bail, Context, Result};
use nix::libc;

use super::traits::{AudioBackend, BackendHandle};
use super::types::{BufferSpace, DeviceCapabilities, FragmentGeometry, Mode, SampleFormat, TriggerMask};

const AFMT_U8: libc::c_int = 0x0000_0008;
const AFMT_S16_LE: libc::c_int = 0x0000_0010;
const AFMT_S16_BE: libc::c_int = 0x0000_0020;
const AFMT_S32_LE: libc::c_int = 0x0000_1000;

const DSP_CAP_DUPLEX: libc::c_int = 0x0000_0100;
const DSP_CAP_TRIGGER: libc::c_int = 0x0000_1000;

const PCM_ENABLE_INPUT: libc::c_int = 0x0000_0001;
const PCM_ENABLE_OUTPUT: libc::c_int = 0x0000_0002;

/// `audio_buf_info` as filled in by SNDCTL_DSP_GETOSPACE / GETISPACE
#[repr(C)]
#[derive(Debug, Default)]
pub struct AudioBufInfo {
    pub fragments: libc::c_int,
    pub fragstotal: libc::c_int,
    pub fragsize: libc::c_int,
    pub bytes: libc::c_int,
}

const SNDCTL_DSP_MAGIC: u8 = b'P';
const SNDCTL_DSP_SPEED: u8 = 2;
const SNDCTL_DSP_GETBLKSIZE: u8 = 4;
const SNDCTL_DSP_SETFMT: u8 = 5;
const SNDCTL_DSP_CHANNELS: u8 = 6;
const SNDCTL_DSP_SETFRAGMENT: u8 = 10;
const SNDCTL_DSP_GETOSPACE: u8 = 12;
const SNDCTL_DSP_GETISPACE: u8 = 13;
const SNDCTL_DSP_GETCAPS: u8 = 15;
const SNDCTL_DSP_SETTRIGGER: u8 = 16;
const SNDCTL_DSP_SETDUPLEX: u8 = 22;

nix::ioctl_readwrite!(oss_set_speed, SNDCTL_DSP_MAGIC, SNDCTL_DSP_SPEED, libc::c_int);
nix::ioctl_readwrite!(oss_get_blksize, SNDCTL_DSP_MAGIC, SNDCTL_DSP_GETBLKSIZE, libc::c_int);
nix::ioctl_readwrite!(oss_set_format, SNDCTL_DSP_MAGIC, SNDCTL_DSP_SETFMT, libc::c_int);
nix::ioctl_readwrite!(oss_set_channels, SNDCTL_DSP_MAGIC, SNDCTL_DSP_CHANNELS, libc::c_int);
nix::ioctl_readwrite!(oss_set_fragment, SNDCTL_DSP_MAGIC, SNDCTL_DSP_SETFRAGMENT, libc::c_int);
nix::ioctl_read!(oss_output_space, SNDCTL_DSP_MAGIC, SNDCTL_DSP_GETOSPACE, AudioBufInfo);
nix::ioctl_read!(oss_input_space, SNDCTL_DSP_MAGIC, SNDCTL_DSP_GETISPACE, AudioBufInfo);
nix::ioctl_read!(oss_get_caps, SNDCTL_DSP_MAGIC, SNDCTL_DSP_GETCAPS, libc::c_int);
nix::ioctl_write_ptr!(oss_set_trigger, SNDCTL_DSP_MAGIC, SNDCTL_DSP_SETTRIGGER, libc::c_int);
nix::ioctl_none!(oss_set_duplex, SNDCTL_DSP_MAGIC, SNDCTL_DSP_SETDUPLEX);

fn format_code(format: SampleFormat) -> libc::c_int {
    match format {
        SampleFormat::U8 => AFMT_U8,
        SampleFormat::S16Le => AFMT_S16_LE,
        SampleFormat::S16Be => AFMT_S16_BE,
        SampleFormat::S32Le => AFMT_S32_LE,
    }
}

fn format_from_code(code: libc::c_int) -> Result<SampleFormat> {
    Ok(match code {
        AFMT_U8 => SampleFormat::U8,
        AFMT_S16_LE => SampleFormat::S16Le,
        AFMT_S16_BE => SampleFormat::S16Be,
        AFMT_S32_LE => SampleFormat::S32Le,
        other => bail!("Driver selected unknown sample format 0x{:x}", other),
    })
}

fn buffer_space(info: &AudioBufInfo) -> BufferSpace {
    BufferSpace {
        fragments: info.fragments.max(0) as usize,
        fragments_total: info.fragstotal.max(0) as usize,
        fragment_bytes: info.fragsize.max(0) as usize,
    }
}

/// Backend opening OSS character devices in blocking mode. Reads and writes
/// are only issued after a readiness notification, so they do not block.
#[derive(Debug, Clone, Default)]
pub struct OssBackend;

impl OssBackend {
    pub fn new() -> Self {
        Self
    }
}

impl AudioBackend for OssBackend {
    fn backend_id(&self) -> &str {
        "oss"
    }

    fn open(&self, path: &str, mode: Mode) -> Result<Box<dyn BackendHandle>> {
        let mut options = File::options();
        match mode {
            Mode::Read => options.read(true),
            Mode::Write => options.write(true),
            Mode::Duplex => options.read(true).write(true),
            Mode::None => bail!("Cannot open {} without a direction", path),
        };
        let file = options
            .open(path)
            .with_context(|| format!("Failed to open {}", path))?;

        Ok(Box::new(OssHandle {
            file,
            bytes: Vec::new(),
        }))
    }
}

struct OssHandle {
    file: File,
    bytes: Vec<u8>,
}

impl OssHandle {
    fn fd(&self) -> libc::c_int {
        self.file.as_raw_fd()
    }
}

impl BackendHandle for OssHandle {
    fn raw_fd(&self) -> Option<RawFd> {
        Some(self.file.as_raw_fd())
    }

    fn set_duplex(&mut self) -> Result<()> {
        unsafe { oss_set_duplex(self.fd()) }.context("SNDCTL_DSP_SETDUPLEX ioctl failed")?;
        Ok(())
    }

    fn capabilities(&mut self) -> Result<DeviceCapabilities> {
        let mut caps: libc::c_int = 0;
        unsafe { oss_get_caps(self.fd(), &mut caps) }.context("SNDCTL_DSP_GETCAPS ioctl failed")?;
        Ok(DeviceCapabilities {
            full_duplex: caps & DSP_CAP_DUPLEX != 0,
            trigger: caps & DSP_CAP_TRIGGER != 0,
        })
    }

    fn set_trigger(&mut self, mask: TriggerMask) -> Result<()> {
        let mut arg: libc::c_int = 0;
        if mask.input {
            arg |= PCM_ENABLE_INPUT;
        }
        if mask.output {
            arg |= PCM_ENABLE_OUTPUT;
        }
        unsafe { oss_set_trigger(self.fd(), &arg) }.context("SNDCTL_DSP_SETTRIGGER ioctl failed")?;
        Ok(())
    }

    fn set_fragment(&mut self, geometry: FragmentGeometry) -> Result<()> {
        let mut arg = ((geometry.count as libc::c_int) << 16) | geometry.size_log2 as libc::c_int;
        unsafe { oss_set_fragment(self.fd(), &mut arg) }.context("SNDCTL_DSP_SETFRAGMENT ioctl failed")?;
        Ok(())
    }

    fn set_format(&mut self, format: SampleFormat) -> Result<SampleFormat> {
        let mut arg = format_code(format);
        unsafe { oss_set_format(self.fd(), &mut arg) }.context("SNDCTL_DSP_SETFMT ioctl failed")?;
        format_from_code(arg)
    }

    fn set_channels(&mut self, channels: usize) -> Result<usize> {
        let mut arg = channels as libc::c_int;
        unsafe { oss_set_channels(self.fd(), &mut arg) }.context("SNDCTL_DSP_CHANNELS ioctl failed")?;
        Ok(arg.max(0) as usize)
    }

    fn set_sample_rate(&mut self, rate: u32) -> Result<u32> {
        let mut arg = rate as libc::c_int;
        unsafe { oss_set_speed(self.fd(), &mut arg) }.context("SNDCTL_DSP_SPEED ioctl failed")?;
        Ok(arg.max(0) as u32)
    }

    fn fragment_bytes(&mut self) -> Result<usize> {
        let mut arg: libc::c_int = 0;
        unsafe { oss_get_blksize(self.fd(), &mut arg) }.context("SNDCTL_DSP_GETBLKSIZE ioctl failed")?;
        Ok(arg.max(0) as usize)
    }

    fn output_space(&mut self) -> Result<BufferSpace> {
        let mut info = AudioBufInfo::default();
        unsafe { oss_output_space(self.fd(), &mut info) }.context("SNDCTL_DSP_GETOSPACE ioctl failed")?;
        Ok(buffer_space(&info))
    }

    fn input_space(&mut self) -> Result<BufferSpace> {
        let mut info = AudioBufInfo::default();
        unsafe { oss_input_space(self.fd(), &mut info) }.context("SNDCTL_DSP_GETISPACE ioctl failed")?;
        Ok(buffer_space(&info))
    }

    fn read(&mut self, buf: &mut [i16]) -> Result<usize> {
        self.bytes.resize(buf.len() * 2, 0);
        let count = self.file.read(&mut self.bytes).context("Read from audio device failed")?;
        let samples = count / 2;
        for (dst, chunk) in buf.iter_mut().zip(self.bytes[..samples * 2].chunks_exact(2)) {
            *dst = i16::from_le_bytes([chunk[0], chunk[1]]);
        }
        Ok(samples)
    }

    fn write(&mut self, buf: &[i16]) -> Result<usize> {
        self.bytes.clear();
        self.bytes.extend(buf.iter().flat_map(|s| s.to_le_bytes()));
        let count = self.file.write(&self.bytes).context("Write to audio device failed")?;
        Ok(count / 2)
    }
}
