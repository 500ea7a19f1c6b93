//! Eiger acquisition state machine.
//!
//! ```text
//! NA -> IDLE          initialize
//! IDLE -> READY       arm
//! READY -> IDLE       disarm
//! READY -> ACQUIRE    trigger (ints) or trigger input (exts)
//! ACQUIRE -> READY    frames of one trigger done, triggers remaining
//! ACQUIRE -> IDLE     all triggers done
//! * -> READY          cancel
//! * -> IDLE           abort
//! ```
//!
//! Commands never fail. A command that makes no sense in the current state is
//! logged and ignored, the way the real detector tolerates out-of-order
//! clients.

use crate::filewriter::{filewriter_config, filewriter_status};
use crate::image::{FrameBlob, Image};
use crate::monitor::{monitor_config, monitor_status};
use crate::settings::{EigerSettings, TriggerMode};
use crate::status::{EigerStatus, State};
use crate::stream::{
    CborStream, HeaderDetail, LegacyStream, StreamEncoder, StreamFormat, stream_config,
    stream_status,
};
use sim_core::field::FieldSet;
use sim_core::{Device, DeviceUpdate, SimTime};
use tokio::sync::watch;

/// Inputs sampled on every update.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EigerInputs {
    /// External trigger line.
    pub trigger: bool,
}

/// The Eiger has no wired outputs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EigerOutputs;

/// Simulated Eiger detector.
///
/// Owns its configuration, status and sub-system records, plus one encoder
/// per stream format. `arm` picks the encoder named by `stream/config/format`
/// and every lifecycle event of that series goes to it.
pub struct EigerDevice {
    settings: EigerSettings,
    status: EigerStatus,
    stream_config: FieldSet,
    stream_status: FieldSet,
    monitor_config: FieldSet,
    monitor_status: FieldSet,
    filewriter_config: FieldSet,
    filewriter_status: FieldSet,

    legacy: Box<dyn StreamEncoder>,
    cbor: Box<dyn StreamEncoder>,
    active: StreamFormat,

    series_id: u64,
    frames_left: u64,
    triggers_left: u64,
    finished: watch::Sender<bool>,
    frame: Option<FrameBlob>,
}

impl EigerDevice {
    /// Detector in state `na` with default settings and both built-in encoders.
    pub fn new() -> Self {
        Self::with_encoders(Box::new(LegacyStream::new()), Box::new(CborStream::new()))
    }

    /// Device writing to the given encoders instead of the built-in ones.
    pub fn with_encoders(legacy: Box<dyn StreamEncoder>, cbor: Box<dyn StreamEncoder>) -> Self {
        let (finished, _) = watch::channel(false);
        Self {
            settings: EigerSettings::new(),
            status: EigerStatus::new(),
            stream_config: stream_config(),
            stream_status: stream_status(),
            monitor_config: monitor_config(),
            monitor_status: monitor_status(),
            filewriter_config: filewriter_config(),
            filewriter_status: filewriter_status(),
            legacy,
            cbor,
            active: StreamFormat::default(),
            series_id: 0,
            frames_left: 0,
            triggers_left: 0,
            finished,
            frame: None,
        }
    }

    /// Replace the settings, e.g. with a preconfigured detector geometry.
    pub fn with_settings(mut self, settings: EigerSettings) -> Self {
        self.settings = settings;
        self
    }

    // -------------------------------------------------------------------------
    // Commands
    // -------------------------------------------------------------------------

    /// Required before anything else; valid from any state.
    pub fn initialize(&mut self) {
        tracing::info!("Initializing Eiger");
        self.set_state(State::Idle);
    }

    /// Open a new series on the configured stream and wait for triggers.
    ///
    /// Not guarded by state: arming while armed starts a fresh series.
    pub fn arm(&mut self) {
        self.active = StreamFormat::parse(self.stream_config.text("format")).unwrap_or_default();
        let header_detail =
            HeaderDetail::parse(self.stream_config.text("header_detail")).unwrap_or_default();
        self.series_id += 1;
        tracing::info!(
            "Arming Eiger: series {} on {} stream",
            self.series_id,
            self.active
        );

        let series_id = self.series_id;
        let settings = &self.settings;
        let stream = match self.active {
            StreamFormat::Legacy => &mut self.legacy,
            StreamFormat::Cbor => &mut self.cbor,
        };
        stream.begin_series(settings, series_id, header_detail);

        self.frames_left = self.settings.nimages();
        self.triggers_left = self.settings.ntrigger();
        self.set_state(State::Ready);
    }

    /// Close the current series and return to IDLE.
    pub fn disarm(&mut self) {
        tracing::info!("Disarming Eiger");
        self.set_state(State::Idle);
        self.end_series();
    }

    /// Software trigger.
    ///
    /// Starts acquisition only when armed in `ints` mode; `exts` acquisitions
    /// start from the trigger input instead. Returns whether acquisition began.
    pub fn trigger(&mut self) -> bool {
        tracing::info!("Trigger requested");
        let trigger_mode = self.settings.trigger_mode();

        if self.state() == State::Ready && trigger_mode == Some(TriggerMode::Ints) {
            self.begin_acquisition();
            true
        } else {
            tracing::info!(
                "Ignoring trigger, state={}, trigger_mode={}",
                self.state(),
                self.settings.fields().text("trigger_mode")
            );
            false
        }
    }

    /// Stop acquiring and return to READY as though just armed.
    pub fn cancel(&mut self) {
        tracing::info!("Cancelling acquisition");
        self.set_state(State::Ready);
        self.end_series();
    }

    /// Stop acquiring and disarm.
    pub fn abort(&mut self) {
        tracing::info!("Aborting acquisition");
        self.set_state(State::Idle);
        self.end_series();
    }

    // -------------------------------------------------------------------------
    // Accessors
    // -------------------------------------------------------------------------

    /// Current acquisition state.
    pub fn state(&self) -> State {
        self.status.state()
    }

    /// Id of the current (or last) series; 0 before the first arm.
    pub fn series_id(&self) -> u64 {
        self.series_id
    }

    /// Frames still to acquire for the current trigger.
    pub fn frames_left(&self) -> u64 {
        self.frames_left
    }

    /// Triggers still expected in this series.
    pub fn triggers_left(&self) -> u64 {
        self.triggers_left
    }

    /// Stream format of the current (or last) series.
    pub fn active_format(&self) -> StreamFormat {
        self.active
    }

    /// Detector configuration.
    pub fn settings(&self) -> &EigerSettings {
        &self.settings
    }

    /// Detector configuration, for writes.
    pub fn settings_mut(&mut self) -> &mut EigerSettings {
        &mut self.settings
    }

    /// Detector status record.
    pub fn status(&self) -> &EigerStatus {
        &self.status
    }

    /// Stream sub-system config.
    pub fn stream_config(&self) -> &FieldSet {
        &self.stream_config
    }

    /// Stream sub-system config, for writes.
    pub fn stream_config_mut(&mut self) -> &mut FieldSet {
        &mut self.stream_config
    }

    /// Stream sub-system status.
    pub fn stream_status(&self) -> &FieldSet {
        &self.stream_status
    }

    /// Monitor sub-system config.
    pub fn monitor_config(&self) -> &FieldSet {
        &self.monitor_config
    }

    /// Monitor sub-system config, for writes.
    pub fn monitor_config_mut(&mut self) -> &mut FieldSet {
        &mut self.monitor_config
    }

    /// Monitor sub-system status.
    pub fn monitor_status(&self) -> &FieldSet {
        &self.monitor_status
    }

    /// FileWriter sub-system config.
    pub fn filewriter_config(&self) -> &FieldSet {
        &self.filewriter_config
    }

    /// FileWriter sub-system config, for writes.
    pub fn filewriter_config_mut(&mut self) -> &mut FieldSet {
        &mut self.filewriter_config
    }

    /// FileWriter sub-system status.
    pub fn filewriter_status(&self) -> &FieldSet {
        &self.filewriter_status
    }

    /// Encoder for a stream format, used by push adapters to drain messages.
    pub fn stream_mut(&mut self, format: StreamFormat) -> &mut dyn StreamEncoder {
        match format {
            StreamFormat::Legacy => self.legacy.as_mut(),
            StreamFormat::Cbor => self.cbor.as_mut(),
        }
    }

    /// Receiver that observes `true` once the frames of a trigger are done.
    ///
    /// Subscribe after triggering; the signal is reset when acquisition begins.
    pub fn finished_signal(&self) -> watch::Receiver<bool> {
        self.finished.subscribe()
    }

    // -------------------------------------------------------------------------
    // Internals
    // -------------------------------------------------------------------------

    fn set_state(&mut self, state: State) {
        self.status.set_state(state);
    }

    fn end_series(&mut self) {
        let series_id = self.series_id;
        self.stream_mut(self.active).end_series(series_id);
        // release anyone waiting on a trigger that will never complete
        self.finished.send_replace(true);
    }

    fn begin_acquisition(&mut self) {
        self.triggers_left = self.triggers_left.saturating_sub(1);
        self.set_state(State::Acquire);
        tracing::info!("Now in acquiring mode");
        self.finished.send_replace(false);
    }

    fn acquire_frame(&mut self) {
        let nimages = self.settings.nimages();
        let ntrigger = self.settings.ntrigger();
        let frame_id = ntrigger
            .saturating_sub(self.triggers_left)
            .saturating_mul(nimages)
            .saturating_sub(self.frames_left);
        tracing::debug!("Frame id {}", frame_id);

        let shape = self.settings.shape();
        let blob = match self.frame.take() {
            Some(blob) if blob.shape() == shape => blob,
            _ => FrameBlob::zeros(shape),
        };
        let image = Image::dummy(frame_id, &blob);
        self.frame = Some(blob);

        let series_id = self.series_id;
        self.stream_mut(self.active).insert_image(image, series_id);
        self.frames_left -= 1;
        tracing::debug!("Frames left: {}", self.frames_left);
        tracing::debug!("Triggers left: {}", self.triggers_left);
    }
}

impl Default for EigerDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl Device for EigerDevice {
    type Inputs = EigerInputs;
    type Outputs = EigerOutputs;

    fn update(&mut self, time: SimTime, inputs: &EigerInputs) -> DeviceUpdate<EigerOutputs> {
        if self.state() == State::Acquire {
            if self.frames_left > 0 {
                self.acquire_frame();
                let next = time + SimTime::from_secs_f64(self.settings.frame_time());
                return DeviceUpdate::new(EigerOutputs, Some(next));
            }

            self.finished.send_replace(true);
            if self.triggers_left > 0 {
                self.set_state(State::Ready);
                self.frames_left = self.settings.nimages();
            } else {
                tracing::debug!("Ending series {}", self.series_id);
                self.set_state(State::Idle);
                let series_id = self.series_id;
                self.stream_mut(self.active).end_series(series_id);
            }
        }

        if inputs.trigger {
            if self.state() == State::Ready
                && self.settings.trigger_mode() == Some(TriggerMode::Exts)
            {
                self.begin_acquisition();
                // process the new state straight away
                return DeviceUpdate::new(EigerOutputs, Some(time));
            }
            tracing::info!(
                "Ignoring trigger input, state={}, trigger_mode={}",
                self.state(),
                self.settings.fields().text("trigger_mode")
            );
        }

        DeviceUpdate::new(EigerOutputs, None)
    }
}
