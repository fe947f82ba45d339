//! # Pipeline Module
//!
//! Wires the codec, filters and detector into a graph of stage threads
//! connected by `crossbeam-channel` links.
//!
//! ## Graph
//! ```text
//! push_frame ─► [messages] ─┬─► recorder ─► .ecg file
//!                           └─► unpack ─► [samples] ─┬─► display (mV + filter chain) ──┐
//!                                                    └─► downsample ─► qrs ─► bpm ────┴─► output ─► EcgSink
//! ```
//!
//! ## Guarantees
//! - Every link is FIFO; nothing is reordered or silently dropped. Bounded
//!   links apply back-pressure to the producer.
//! - A sampling-rate change travels through the graph as an in-band marker,
//!   so each stage rebuilds its rate-dependent state exactly between the
//!   last old-rate sample and the first new-rate one.
//! - Closing the source drains every stage in turn. The recorder finalizes
//!   its file, and the output stage calls `EcgSink::on_complete` once, after
//!   the last value it delivers.

use crate::codec::{decode, Calibration, Message};
use crate::config::PipelineConfig;
use crate::downsample::Downsampler;
use crate::error::PipelineError;
use crate::filters::{FilterChain, FilterStage};
use crate::heart_rate::bpm;
use crate::qrs::QrsDetector;
use crate::recorder::Recorder;
use crossbeam_channel::{bounded, unbounded, Receiver, Sender};
use std::thread::{self, JoinHandle};

/// Consumer of the pipeline's results. Called from the output stage thread.
pub trait EcgSink: Send {
    /// Filtered sample in millivolts
    fn on_sample(&mut self, millivolts: f64);
    fn on_heart_rate(&mut self, bpm: u32);
    /// Called once after the last sample or heart rate
    fn on_complete(&mut self);
}

/// Item travelling over a link between stages
#[derive(Debug, Clone, Copy, PartialEq)]
enum Link<T> {
    Data(T),
    /// New sampling rate in Hz; everything after it was sampled at that rate
    Reconfigure(u16),
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Output {
    Sample(f64),
    HeartRate(u32),
}

fn link<T>(capacity: usize) -> (Sender<T>, Receiver<T>) {
    if capacity == 0 {
        unbounded()
    } else {
        bounded(capacity)
    }
}

/// Rate the QRS detector actually runs at for a given input rate.
///
/// The downsampling ratio is an integer, so this only equals `target_rate`
/// when it divides the input rate.
pub fn detector_rate(input_rate: u32, target_rate: u32) -> u32 {
    let ratio = Downsampler::new(input_rate, target_rate).ratio();
    (f64::from(input_rate) / ratio as f64).round() as u32
}

/// A single-input, single-output stage with rate-dependent state.
trait Stage: Send + 'static {
    type In: Send + 'static;
    type Out: Send + 'static;

    fn on_data(&mut self, input: Self::In, out: &mut Vec<Self::Out>);

    fn on_reconfigure(&mut self, sampling_rate: u16, out: &mut Vec<Self::Out>);
}

fn run_stage<S: Stage>(name: &'static str, mut stage: S, input: Receiver<Link<S::In>>, output: Sender<S::Out>) {
    let mut pending = Vec::new();
    for item in input.iter() {
        match item {
            Link::Data(data) => stage.on_data(data, &mut pending),
            Link::Reconfigure(rate) => {
                log::debug!("Stage '{}' reconfigured for {} Hz", name, rate);
                stage.on_reconfigure(rate, &mut pending);
            }
        }
        for value in pending.drain(..) {
            if output.send(value).is_err() {
                log::debug!("Stage '{}' stopped: downstream closed", name);
                return;
            }
        }
    }
}

/// Forwards every item to all outputs that are still connected.
fn run_broadcast<T: Clone>(name: &'static str, input: Receiver<T>, mut outputs: Vec<Sender<T>>) {
    for item in input.iter() {
        outputs.retain(|output| output.send(item.clone()).is_ok());
        if outputs.is_empty() {
            log::debug!("Broadcast '{}' stopped: no outputs left", name);
            return;
        }
    }
}

struct Unpack;

impl Stage for Unpack {
    type In = Message;
    type Out = Link<u16>;

    fn on_data(&mut self, message: Message, out: &mut Vec<Link<u16>>) {
        out.extend(message.iter().map(|&sample| Link::Data(sample)));
    }

    fn on_reconfigure(&mut self, sampling_rate: u16, out: &mut Vec<Link<u16>>) {
        out.push(Link::Reconfigure(sampling_rate));
    }
}

struct Display {
    calibration: Calibration,
    stages: Vec<FilterStage>,
    chain: FilterChain,
}

impl Display {
    fn new(calibration: Calibration, stages: Vec<FilterStage>, sampling_rate: u16) -> Self {
        let chain = FilterChain::for_rate(&stages, f64::from(sampling_rate));
        Self {
            calibration,
            stages,
            chain,
        }
    }
}

impl Stage for Display {
    type In = u16;
    type Out = Output;

    fn on_data(&mut self, sample: u16, out: &mut Vec<Output>) {
        let millivolts = self.calibration.to_millivolts(sample);
        out.push(Output::Sample(self.chain.process(millivolts)));
    }

    fn on_reconfigure(&mut self, sampling_rate: u16, _out: &mut Vec<Output>) {
        self.chain = FilterChain::for_rate(&self.stages, f64::from(sampling_rate));
    }
}

/// Millivolt conversion and batch averaging down to the detector rate
struct Decimate {
    calibration: Calibration,
    target_rate: u32,
    downsampler: Downsampler,
}

impl Stage for Decimate {
    type In = u16;
    type Out = Link<f64>;

    fn on_data(&mut self, sample: u16, out: &mut Vec<Link<f64>>) {
        let millivolts = self.calibration.to_millivolts(sample);
        if let Some(mean) = self.downsampler.push(millivolts) {
            out.push(Link::Data(mean));
        }
    }

    fn on_reconfigure(&mut self, sampling_rate: u16, out: &mut Vec<Link<f64>>) {
        self.downsampler = Downsampler::new(u32::from(sampling_rate), self.target_rate);
        out.push(Link::Reconfigure(sampling_rate));
    }
}

struct Detect {
    target_rate: u32,
    detector: Option<QrsDetector>,
}

impl Detect {
    fn build(sampling_rate: u16, target_rate: u32) -> Option<QrsDetector> {
        let rate = detector_rate(u32::from(sampling_rate), target_rate);
        match QrsDetector::new(rate) {
            Ok(detector) => Some(detector),
            Err(e) => {
                log::warn!("Heart rate disabled at {} Hz: {}", sampling_rate, e);
                None
            }
        }
    }
}

impl Stage for Detect {
    type In = f64;
    type Out = Link<u32>;

    fn on_data(&mut self, sample: f64, out: &mut Vec<Link<u32>>) {
        if let Some(rr) = self.detector.as_mut().and_then(|d| d.update(sample)) {
            out.push(Link::Data(rr));
        }
    }

    fn on_reconfigure(&mut self, sampling_rate: u16, out: &mut Vec<Link<u32>>) {
        self.detector = Self::build(sampling_rate, self.target_rate);
        out.push(Link::Reconfigure(sampling_rate));
    }
}

struct HeartRate {
    target_rate: u32,
    reference_rate: u32,
}

impl Stage for HeartRate {
    type In = u32;
    type Out = Output;

    fn on_data(&mut self, rr: u32, out: &mut Vec<Output>) {
        if let Some(rate) = bpm(rr, self.reference_rate) {
            out.push(Output::HeartRate(rate));
        }
    }

    fn on_reconfigure(&mut self, sampling_rate: u16, _out: &mut Vec<Output>) {
        self.reference_rate = detector_rate(u32::from(sampling_rate), self.target_rate);
    }
}

fn run_recorder(mut recorder: Recorder, sampling_rate: u16, input: Receiver<Link<Message>>) {
    if let Err(e) = recorder.start(sampling_rate) {
        log::error!("Failed to start recording: {}", e);
    }
    for item in input.iter() {
        match item {
            Link::Data(message) => recorder.write(&message),
            Link::Reconfigure(rate) => {
                if let Err(e) = recorder.roll_over(rate) {
                    log::error!("Failed to roll recording over to {} Hz: {}", rate, e);
                }
            }
        }
    }
    recorder.finish();
}

fn run_output(mut sink: Box<dyn EcgSink>, input: Receiver<Output>) {
    for output in input.iter() {
        match output {
            Output::Sample(millivolts) => sink.on_sample(millivolts),
            Output::HeartRate(rate) => sink.on_heart_rate(rate),
        }
    }
    sink.on_complete();
}

/// Handle to a running pipeline. Dropping it closes the pipeline.
pub struct Pipeline {
    input: Option<Sender<Link<Message>>>,
    stages: Vec<(&'static str, JoinHandle<()>)>,
    sampling_rate: u16,
}

impl Pipeline {
    /// Spawns all stages for a stream sampled at `sampling_rate` Hz.
    ///
    /// With a recorder the raw stream is written to a new file from the
    /// first frame on.
    pub fn new(
        config: &PipelineConfig,
        sampling_rate: u16,
        sink: Box<dyn EcgSink>,
        recorder: Option<Recorder>,
    ) -> Result<Self, PipelineError> {
        if sampling_rate == 0 {
            return Err(PipelineError::InvalidSamplingRate(sampling_rate));
        }
        let capacity = config.link_capacity;
        let target_rate = config.qrs_rate_hz;
        let mut stages = Vec::new();

        let (output_tx, output_rx) = link::<Output>(capacity);
        spawn(&mut stages, "output", move || run_output(sink, output_rx))?;

        let (rr_tx, rr_rx) = link(capacity);
        let heart_rate = HeartRate {
            target_rate,
            reference_rate: detector_rate(u32::from(sampling_rate), target_rate),
        };
        let tx = output_tx.clone();
        spawn(&mut stages, "heart-rate", move || {
            run_stage("heart-rate", heart_rate, rr_rx, tx)
        })?;

        let (decimated_tx, decimated_rx) = link(capacity);
        let detect = Detect {
            target_rate,
            detector: Detect::build(sampling_rate, target_rate),
        };
        spawn(&mut stages, "qrs", move || {
            run_stage("qrs", detect, decimated_rx, rr_tx)
        })?;

        let (decimate_in_tx, decimate_in_rx) = link(capacity);
        let decimate = Decimate {
            calibration: config.calibration,
            target_rate,
            downsampler: Downsampler::new(u32::from(sampling_rate), target_rate),
        };
        spawn(&mut stages, "downsample", move || {
            run_stage("downsample", decimate, decimate_in_rx, decimated_tx)
        })?;

        let (display_tx, display_rx) = link(capacity);
        let display = Display::new(
            config.calibration,
            config.display_filters.clone(),
            sampling_rate,
        );
        spawn(&mut stages, "display", move || {
            run_stage("display", display, display_rx, output_tx)
        })?;

        let (samples_tx, samples_rx) = link(capacity);
        spawn(&mut stages, "sample-broadcast", move || {
            run_broadcast("samples", samples_rx, vec![display_tx, decimate_in_tx])
        })?;

        let (unpack_tx, unpack_rx) = link(capacity);
        spawn(&mut stages, "unpack", move || {
            run_stage("unpack", Unpack, unpack_rx, samples_tx)
        })?;

        let mut message_outputs = vec![unpack_tx];
        if let Some(recorder) = recorder {
            let (recorder_tx, recorder_rx) = link(capacity);
            spawn(&mut stages, "recorder", move || {
                run_recorder(recorder, sampling_rate, recorder_rx)
            })?;
            message_outputs.push(recorder_tx);
        }

        let (input_tx, input_rx) = link(capacity);
        spawn(&mut stages, "message-broadcast", move || {
            run_broadcast("messages", input_rx, message_outputs)
        })?;

        log::info!(
            "Pipeline started at {} Hz ({} stages)",
            sampling_rate,
            stages.len()
        );
        Ok(Self {
            input: Some(input_tx),
            stages,
            sampling_rate,
        })
    }

    pub fn sampling_rate(&self) -> u16 {
        self.sampling_rate
    }

    pub fn is_closed(&self) -> bool {
        self.input.is_none()
    }

    /// Decodes a notification frame and feeds it into the graph.
    ///
    /// A malformed frame is rejected on its own; the pipeline stays usable.
    pub fn push_frame(&self, frame: &[u8]) -> Result<(), PipelineError> {
        let message = decode(frame)?;
        self.push_message(message)
    }

    pub fn push_message(&self, message: Message) -> Result<(), PipelineError> {
        self.send(Link::Data(message))
    }

    /// Reinitializes every rate-dependent stage at the current stream
    /// position. Setting the current rate again is a no-op.
    pub fn set_sampling_rate(&mut self, sampling_rate: u16) -> Result<(), PipelineError> {
        if sampling_rate == 0 {
            return Err(PipelineError::InvalidSamplingRate(sampling_rate));
        }
        if sampling_rate == self.sampling_rate {
            return Ok(());
        }
        self.send(Link::Reconfigure(sampling_rate))?;
        log::info!(
            "Pipeline sampling rate changed: {} Hz -> {} Hz",
            self.sampling_rate,
            sampling_rate
        );
        self.sampling_rate = sampling_rate;
        Ok(())
    }

    /// Closes the source and waits until every stage has drained.
    /// Calling it again does nothing.
    pub fn close(&mut self) {
        if self.input.take().is_none() {
            return;
        }
        for (name, handle) in self.stages.drain(..) {
            if handle.join().is_err() {
                log::error!("Pipeline stage '{}' panicked", name);
            }
        }
        log::info!("Pipeline closed");
    }

    fn send(&self, item: Link<Message>) -> Result<(), PipelineError> {
        let input = self.input.as_ref().ok_or(PipelineError::Closed)?;
        input.send(item).map_err(|_| PipelineError::Closed)
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        self.close();
    }
}

fn spawn<F>(
    stages: &mut Vec<(&'static str, JoinHandle<()>)>,
    name: &'static str,
    body: F,
) -> Result<(), PipelineError>
where
    F: FnOnce() + Send + 'static,
{
    let handle = thread::Builder::new()
        .name(format!("ecg-{}", name))
        .spawn(body)
        .map_err(|source| {
            log::error!("Failed to spawn pipeline stage '{}': {}", name, source);
            PipelineError::Spawn { stage: name, source }
        })?;
    stages.push((name, handle));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{encode, SAMPLES_PER_FRAME};
    use crate::ecg_file::EcgFile;
    use crate::recorder::list_recordings;
    use crate::simulator::{Simulator, Waveform};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;
    use tempfile::tempdir;

    #[derive(Debug, Clone, PartialEq)]
    enum Event {
        Sample(f64),
        HeartRate(u32),
        Complete,
    }

    #[derive(Clone, Default)]
    struct TestSink {
        events: Arc<Mutex<Vec<Event>>>,
        delay: Option<Duration>,
    }

    impl TestSink {
        fn events(&self) -> Vec<Event> {
            self.events.lock().unwrap().clone()
        }
    }

    impl EcgSink for TestSink {
        fn on_sample(&mut self, millivolts: f64) {
            if let Some(delay) = self.delay {
                thread::sleep(delay);
            }
            self.events.lock().unwrap().push(Event::Sample(millivolts));
        }

        fn on_heart_rate(&mut self, bpm: u32) {
            self.events.lock().unwrap().push(Event::HeartRate(bpm));
        }

        fn on_complete(&mut self) {
            self.events.lock().unwrap().push(Event::Complete);
        }
    }

    fn unfiltered_config() -> PipelineConfig {
        PipelineConfig {
            display_filters: Vec::new(),
            ..PipelineConfig::default()
        }
    }

    fn ramp_message(start: u16) -> Message {
        let mut message = [0u16; SAMPLES_PER_FRAME];
        for (i, sample) in message.iter_mut().enumerate() {
            *sample = (start + i as u16) % 1024;
        }
        message
    }

    #[test]
    fn test_samples_delivered_in_order_then_complete_once() {
        let sink = TestSink::default();
        let config = unfiltered_config();
        let mut pipeline = Pipeline::new(&config, 500, Box::new(sink.clone()), None).unwrap();

        let mut expected = Vec::new();
        for frame in 0..50u16 {
            let message = ramp_message(frame * 16);
            expected.extend(
                message
                    .iter()
                    .map(|&s| Event::Sample(config.calibration.to_millivolts(s))),
            );
            pipeline.push_frame(&encode(&message)).unwrap();
        }
        pipeline.close();
        pipeline.close();
        drop(pipeline);

        let events = sink.events();
        let samples: Vec<Event> = events
            .iter()
            .filter(|e| matches!(e, Event::Sample(_)))
            .cloned()
            .collect();
        assert_eq!(samples, expected);
        assert_eq!(events.iter().filter(|e| **e == Event::Complete).count(), 1);
        assert_eq!(events.last(), Some(&Event::Complete));
    }

    #[test]
    fn test_invalid_frame_rejected_and_stream_continues() {
        let sink = TestSink::default();
        let mut pipeline =
            Pipeline::new(&unfiltered_config(), 500, Box::new(sink.clone()), None).unwrap();

        assert!(matches!(
            pipeline.push_frame(&[0u8; 19]),
            Err(PipelineError::Codec(_))
        ));
        pipeline.push_frame(&encode(&[512; 16])).unwrap();
        pipeline.close();

        let samples = sink
            .events()
            .iter()
            .filter(|e| matches!(e, Event::Sample(_)))
            .count();
        assert_eq!(samples, 16);
    }

    #[test]
    fn test_push_after_close_fails() {
        let mut pipeline =
            Pipeline::new(&unfiltered_config(), 500, Box::new(TestSink::default()), None).unwrap();
        pipeline.close();
        assert!(pipeline.is_closed());
        assert!(matches!(
            pipeline.push_frame(&encode(&[0; 16])),
            Err(PipelineError::Closed)
        ));
        assert!(matches!(
            pipeline.set_sampling_rate(250),
            Err(PipelineError::Closed)
        ));
    }

    #[test]
    fn test_zero_rate_rejected() {
        assert!(matches!(
            Pipeline::new(&unfiltered_config(), 0, Box::new(TestSink::default()), None),
            Err(PipelineError::InvalidSamplingRate(0))
        ));
        let mut pipeline =
            Pipeline::new(&unfiltered_config(), 500, Box::new(TestSink::default()), None).unwrap();
        assert!(matches!(
            pipeline.set_sampling_rate(0),
            Err(PipelineError::InvalidSamplingRate(0))
        ));
        assert_eq!(pipeline.sampling_rate(), 500);
    }

    #[test]
    fn test_heart_rate_from_simulated_beats() {
        let sink = TestSink::default();
        let mut pipeline =
            Pipeline::new(&PipelineConfig::default(), 500, Box::new(sink.clone()), None).unwrap();

        let simulator = Simulator::new(Waveform::Heartbeat { bpm: 75 }, 500);
        for frame in simulator.take(30 * 500 / SAMPLES_PER_FRAME) {
            pipeline.push_frame(&frame).unwrap();
        }
        pipeline.close();

        let rates: Vec<u32> = sink
            .events()
            .iter()
            .filter_map(|e| match e {
                Event::HeartRate(bpm) => Some(*bpm),
                _ => None,
            })
            .collect();
        assert!(rates.len() > 20, "only {} heart rates", rates.len());
        assert!(rates.iter().all(|&bpm| bpm == 75), "{:?}", rates);
    }

    #[test]
    fn test_rate_change_rolls_recording_over() {
        let temp_dir = tempdir().unwrap();
        let recorder = Recorder::new(temp_dir.path(), true);
        let mut pipeline = Pipeline::new(
            &unfiltered_config(),
            500,
            Box::new(TestSink::default()),
            Some(recorder),
        )
        .unwrap();

        for _ in 0..10 {
            pipeline.push_message([100; 16]).unwrap();
        }
        pipeline.set_sampling_rate(500).unwrap();
        pipeline.set_sampling_rate(250).unwrap();
        assert_eq!(pipeline.sampling_rate(), 250);
        for _ in 0..4 {
            pipeline.push_message([200; 16]).unwrap();
        }
        pipeline.close();

        let mut files: Vec<EcgFile> = list_recordings(temp_dir.path())
            .unwrap()
            .iter()
            .map(|r| EcgFile::open(&r.path).unwrap())
            .collect();
        files.sort_by_key(|f| f.sampling_rate());
        assert_eq!(files.len(), 2);
        assert_eq!(files[0].sampling_rate(), 250);
        assert_eq!(files[0].samples_count(), 64);
        assert_eq!(files[1].sampling_rate(), 500);
        assert_eq!(files[1].samples_count(), 160);

        let first: Vec<u16> = files.remove(1).into_samples().unwrap().collect();
        assert!(first.iter().all(|&s| s == 100));
    }

    #[test]
    fn test_bounded_links_deliver_everything_to_slow_sink() {
        let sink = TestSink {
            delay: Some(Duration::from_micros(200)),
            ..TestSink::default()
        };
        let config = PipelineConfig {
            link_capacity: 1,
            ..unfiltered_config()
        };
        let mut pipeline = Pipeline::new(&config, 500, Box::new(sink.clone()), None).unwrap();
        for n in 0..20 {
            pipeline.push_message(ramp_message(n * 16)).unwrap();
        }
        pipeline.close();

        let samples = sink
            .events()
            .iter()
            .filter(|e| matches!(e, Event::Sample(_)))
            .count();
        assert_eq!(samples, 320);
    }

    #[test]
    fn test_detector_rate() {
        assert_eq!(detector_rate(500, 200), 250);
        assert_eq!(detector_rate(1000, 200), 200);
        assert_eq!(detector_rate(130, 200), 130);
        assert_eq!(detector_rate(200, 200), 200);
    }
}
