//! The interactive annotation loop.

use super::display::{render_overlay, Display, InputEvent, OperatorAction};
use super::session::AnnotationSession;
use super::store::SampleStore;
use super::video::FrameSource;
use super::{Frame, PersistedSample};
use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerState {
    /// Waiting for operator input on this frame.
    Browsing(usize),
    Terminated,
}

#[derive(Debug, Clone, Default)]
pub struct SessionSummary {
    pub frames_visited: usize,
    pub last_frame: Option<usize>,
    pub saved: Vec<PersistedSample>,
}

enum Transition {
    Advance,
    Jump(Frame),
    Terminate,
}

pub struct AnnotationController<S, D> {
    video_title: String,
    source: Option<S>,
    display: D,
    session: AnnotationSession,
    store: SampleStore,
    state: ControllerState,
}

impl<S: FrameSource, D: Display> AnnotationController<S, D> {
    pub fn new(
        video_title: impl Into<String>,
        source: S,
        display: D,
        session: AnnotationSession,
        store: SampleStore,
    ) -> Self {
        Self {
            video_title: video_title.into(),
            source: Some(source),
            display,
            session,
            store,
            state: ControllerState::Browsing(0),
        }
    }

    pub fn state(&self) -> ControllerState {
        self.state
    }

    pub fn session(&self) -> &AnnotationSession {
        &self.session
    }

    /// Browse frames until quit, end of stream or a decode failure.
    /// The frame source is released before this returns, on every path.
    pub fn run(&mut self) -> Result<SessionSummary> {
        if self.state == ControllerState::Terminated {
            return Err(Error::Input("annotation session already terminated".to_string()));
        }

        let result = self.browse_frames();
        self.terminate();
        result
    }

    fn browse_frames(&mut self) -> Result<SessionSummary> {
        let mut summary = SessionSummary::default();
        let mut next = self.read_sequential();

        while let Some(frame) = next.take() {
            self.enter(&frame)?;
            summary.frames_visited += 1;
            summary.last_frame = Some(frame.index);

            next = match self.browse(&frame, &mut summary)? {
                Transition::Advance => self.read_sequential(),
                Transition::Jump(target) => Some(target),
                Transition::Terminate => None,
            };
        }

        Ok(summary)
    }

    fn terminate(&mut self) {
        if let Some(source) = self.source.take() {
            drop(source);
            tracing::debug!("frame source released");
        }
        self.state = ControllerState::Terminated;
    }

    /// Decode failures end the session like end of stream does.
    fn read_sequential(&mut self) -> Option<Frame> {
        let source = self.source.as_mut()?;
        match source.read_next() {
            Ok(frame) => frame,
            Err(e) => {
                tracing::warn!(error = %e, "decode failed, ending session");
                None
            }
        }
    }

    fn enter(&mut self, frame: &Frame) -> Result<()> {
        self.state = ControllerState::Browsing(frame.index);
        self.session.begin_frame(frame.width(), frame.height());

        let total = self.source.as_ref().map_or(0, |s| s.total_count());
        self.display.set_position(frame.index, total);
        self.render(frame)?;

        tracing::info!(
            "Frame {}: 's' save, 'n'/'p' change class, 'c' clear boxes, 'q' quit",
            frame.index
        );
        Ok(())
    }

    fn render(&mut self, frame: &Frame) -> Result<()> {
        let mut boxes = self.session.boxes().to_vec();
        boxes.extend(self.session.pending_box());
        let overlay = render_overlay(&frame.image, &boxes);
        self.display.show(&overlay)
    }

    fn browse(&mut self, frame: &Frame, summary: &mut SessionSummary) -> Result<Transition> {
        loop {
            let Some(event) = self.display.next_event()? else {
                tracing::info!("input closed");
                return Ok(Transition::Terminate);
            };

            let action = match event {
                InputEvent::Pointer(pointer) => {
                    if let Some(bbox) = self.session.handle_pointer(pointer) {
                        tracing::debug!(?bbox, class = self.session.class_name(), "box added");
                    }
                    self.render(frame)?;
                    continue;
                }
                InputEvent::Action(action) => action,
            };

            match action {
                OperatorAction::Save => {
                    let labels = self.session.annotation_set();
                    match self.store.save(&self.video_title, frame, &labels) {
                        Ok(Some(sample)) => {
                            tracing::info!(
                                stem = %sample.stem,
                                boxes = labels.len(),
                                "annotations and image saved"
                            );
                            summary.saved.push(sample);
                            return Ok(Transition::Advance);
                        }
                        Ok(None) => {
                            tracing::debug!(frame = frame.index, "no boxes, nothing saved");
                            return Ok(Transition::Advance);
                        }
                        Err(e) => {
                            tracing::error!(frame = frame.index, error = %e, "save failed");
                        }
                    }
                }
                OperatorAction::NextClass => {
                    self.session.select_next_class();
                    tracing::info!("Current class: {}", self.session.class_name());
                }
                OperatorAction::PreviousClass => {
                    self.session.select_previous_class();
                    tracing::info!("Current class: {}", self.session.class_name());
                }
                OperatorAction::Clear => {
                    self.session.clear();
                    self.render(frame)?;
                    tracing::info!("cleared bounding boxes for frame {}", frame.index);
                }
                OperatorAction::Jump(index) => {
                    let Some(source) = self.source.as_mut() else {
                        return Ok(Transition::Terminate);
                    };
                    match source.seek(index) {
                        Ok(target) => return Ok(Transition::Jump(target)),
                        Err(e @ Error::OutOfRange { .. }) => {
                            tracing::warn!(error = %e, "jump ignored");
                        }
                        Err(e) => {
                            tracing::warn!(error = %e, "seek failed, ending session");
                            return Ok(Transition::Terminate);
                        }
                    }
                }
                OperatorAction::Quit => return Ok(Transition::Terminate),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::io::Cursor;

    use image::RgbImage;
    use tempfile::TempDir;

    use super::*;
    use crate::annotation::display::ScriptedDisplay;
    use crate::annotation::video::testing::MemoryFrameSource;

    /// Console display that also keeps what was shown.
    struct RecordingDisplay {
        inner: ScriptedDisplay<Cursor<String>>,
        shown: Vec<RgbImage>,
        positions: Vec<(usize, usize)>,
    }

    impl RecordingDisplay {
        fn new(script: &str) -> Self {
            Self {
                inner: ScriptedDisplay::new(Cursor::new(script.to_string())),
                shown: Vec::new(),
                positions: Vec::new(),
            }
        }
    }

    impl Display for RecordingDisplay {
        fn show(&mut self, image: &RgbImage) -> Result<()> {
            self.shown.push(image.clone());
            Ok(())
        }

        fn set_position(&mut self, index: usize, total: usize) {
            self.positions.push((index, total));
        }

        fn next_event(&mut self) -> Result<Option<InputEvent>> {
            self.inner.next_event()
        }
    }

    fn controller(
        tmp: &TempDir,
        source: MemoryFrameSource,
        script: &str,
        classes: &[&str],
    ) -> AnnotationController<MemoryFrameSource, RecordingDisplay> {
        let session =
            AnnotationSession::new(classes.iter().map(|c| c.to_string()).collect()).unwrap();
        let store = SampleStore::create(tmp.path()).unwrap();
        AnnotationController::new("clip", source, RecordingDisplay::new(script), session, store)
    }

    fn files_in(dir: std::path::PathBuf) -> Vec<String> {
        let mut names: Vec<String> = fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }

    #[test]
    fn test_save_persists_pair_and_advances() {
        let tmp = TempDir::new().unwrap();
        let script = "down 10 10\nmove 20 20\nup 30 40\ns\nq\n";
        let mut ctl = controller(&tmp, MemoryFrameSource::solid(4, 64, 48), script, &["rat"]);

        let summary = ctl.run().unwrap();
        assert_eq!(summary.frames_visited, 2);
        assert_eq!(summary.last_frame, Some(1));
        assert_eq!(summary.saved.len(), 1);
        assert_eq!(files_in(tmp.path().join("images")), ["clip_frame_000000.jpg"]);
        assert_eq!(files_in(tmp.path().join("labels")), ["clip_frame_000000.txt"]);

        let label = fs::read_to_string(tmp.path().join("labels/clip_frame_000000.txt")).unwrap();
        assert_eq!(label, "0 0.312500 0.520833 0.312500 0.625000");
        assert_eq!(ctl.state(), ControllerState::Terminated);
    }

    #[test]
    fn test_saved_image_is_undrawn_but_overlay_is_not() {
        let tmp = TempDir::new().unwrap();
        let script = "down 8 8\nup 40 40\ns\nq\n";
        let mut ctl = controller(&tmp, MemoryFrameSource::solid(2, 64, 48), script, &["rat"]);
        ctl.run().unwrap();

        let last_overlay_of_frame0 = &ctl.display.shown[2];
        assert_eq!(last_overlay_of_frame0.get_pixel(8, 8).0, [0, 255, 0]);

        let saved = image::open(tmp.path().join("images/clip_frame_000000.jpg"))
            .unwrap()
            .to_rgb8();
        assert!(saved.get_pixel(8, 8).0[1] < 40);
        assert!(saved.get_pixel(40, 20).0[1] < 40);
    }

    #[test]
    fn test_press_at_coordinate_limit_renders() {
        let tmp = TempDir::new().unwrap();
        let script = "down 2147483647 5\nq\n";
        let mut ctl = controller(&tmp, MemoryFrameSource::solid(2, 64, 48), script, &["rat"]);

        let summary = ctl.run().unwrap();
        assert_eq!(summary.frames_visited, 1);
        assert_eq!(ctl.display.shown.len(), 2);
        assert_eq!(ctl.state(), ControllerState::Terminated);
    }

    #[test]
    fn test_drag_far_outside_frame_is_clamped() {
        let tmp = TempDir::new().unwrap();
        let script = "down -2000000000 0\nmove 2000000000 10\nup 2000000000 10\ns\nq\n";
        let mut ctl = controller(&tmp, MemoryFrameSource::solid(2, 64, 48), script, &["rat"]);

        let summary = ctl.run().unwrap();
        assert_eq!(summary.saved.len(), 1);
        let dragging = &ctl.display.shown[2];
        assert_eq!(dragging.get_pixel(0, 5).0, [0, 255, 0]);
        assert_eq!(dragging.get_pixel(63, 5).0, [0, 255, 0]);

        let label = fs::read_to_string(tmp.path().join("labels/clip_frame_000000.txt")).unwrap();
        assert_eq!(label, "0 0.500000 0.104167 1.000000 0.208333");
    }

    #[test]
    fn test_failed_save_leaves_no_orphan_image() {
        let tmp = TempDir::new().unwrap();
        let script = "down 0 0\nup 8 8\ns\nq\n";
        let mut ctl = controller(&tmp, MemoryFrameSource::solid(2, 16, 16), script, &["rat"]);
        fs::create_dir(tmp.path().join("labels/clip_frame_000000.txt")).unwrap();

        let summary = ctl.run().unwrap();
        assert!(summary.saved.is_empty());
        assert_eq!(summary.last_frame, Some(0));
        assert!(files_in(tmp.path().join("images")).is_empty());
    }

    #[test]
    fn test_empty_save_writes_nothing_and_advances() {
        let tmp = TempDir::new().unwrap();
        let source = MemoryFrameSource::solid(10, 16, 16);
        let mut ctl = controller(&tmp, source, "j 5\ns\nq\n", &["rat"]);

        let summary = ctl.run().unwrap();
        assert!(summary.saved.is_empty());
        assert_eq!(summary.last_frame, Some(6));
        assert!(files_in(tmp.path().join("images")).is_empty());
        assert!(!tmp.path().join("labels/clip_frame_000005.txt").exists());
    }

    #[test]
    fn test_jump_then_save_uses_jumped_index() {
        let tmp = TempDir::new().unwrap();
        let script = "j 7\ndown 0 0\nup 8 8\ns\nq\n";
        let mut ctl = controller(&tmp, MemoryFrameSource::solid(10, 16, 16), script, &["rat"]);

        let summary = ctl.run().unwrap();
        assert_eq!(summary.saved[0].stem, "clip_frame_000007");
        assert_eq!(summary.last_frame, Some(8));
        assert_eq!(ctl.display.positions, [(0, 10), (7, 10), (8, 10)]);
    }

    #[test]
    fn test_jump_discards_pending_boxes() {
        let tmp = TempDir::new().unwrap();
        let script = "down 0 0\nup 8 8\nj 3\ns\nq\n";
        let mut ctl = controller(&tmp, MemoryFrameSource::solid(5, 16, 16), script, &["rat"]);

        assert!(ctl.run().unwrap().saved.is_empty());
    }

    #[test]
    fn test_out_of_range_jump_is_ignored() {
        let tmp = TempDir::new().unwrap();
        let script = "down 0 0\nup 8 8\nj 99\ns\nq\n";
        let mut ctl = controller(&tmp, MemoryFrameSource::solid(3, 16, 16), script, &["rat"]);

        let summary = ctl.run().unwrap();
        assert_eq!(summary.saved.len(), 1);
        assert_eq!(summary.saved[0].stem, "clip_frame_000000");
    }

    #[test]
    fn test_clear_drops_boxes_before_save() {
        let tmp = TempDir::new().unwrap();
        let script = "down 0 0\nup 8 8\nc\ns\nq\n";
        let mut ctl = controller(&tmp, MemoryFrameSource::solid(3, 16, 16), script, &["rat"]);

        assert!(ctl.run().unwrap().saved.is_empty());
        assert!(files_in(tmp.path().join("labels")).is_empty());
    }

    #[test]
    fn test_class_selection_carries_into_labels() {
        let tmp = TempDir::new().unwrap();
        let script = "n\ndown 0 0\nup 8 8\ns\ndown 0 0\nup 4 4\ns\nq\n";
        let mut ctl = controller(
            &tmp,
            MemoryFrameSource::solid(3, 16, 16),
            script,
            &["rat", "mouse"],
        );
        ctl.run().unwrap();

        for stem in ["clip_frame_000000", "clip_frame_000001"] {
            let label = fs::read_to_string(tmp.path().join(format!("labels/{stem}.txt"))).unwrap();
            assert!(label.starts_with("1 "), "{label}");
        }
        assert_eq!(ctl.session().class_id(), 1);
    }

    #[test]
    fn test_end_of_stream_terminates() {
        let tmp = TempDir::new().unwrap();
        let mut ctl = controller(&tmp, MemoryFrameSource::solid(3, 8, 8), "s\ns\ns\ns\n", &["rat"]);

        let summary = ctl.run().unwrap();
        assert_eq!(summary.frames_visited, 3);
        assert_eq!(summary.last_frame, Some(2));
        assert_eq!(ctl.state(), ControllerState::Terminated);
    }

    #[test]
    fn test_decode_failure_ends_session() {
        let tmp = TempDir::new().unwrap();
        let source = MemoryFrameSource::solid(5, 8, 8).failing_at(2);
        let mut ctl = controller(&tmp, source, "s\ns\ns\n", &["rat"]);

        let summary = ctl.run().unwrap();
        assert_eq!(summary.frames_visited, 2);
        assert_eq!(ctl.state(), ControllerState::Terminated);
    }

    #[test]
    fn test_quit_releases_source_and_is_final() {
        let tmp = TempDir::new().unwrap();
        let source = MemoryFrameSource::solid(5, 8, 8);
        let released = source.release_flag();
        let mut ctl = controller(&tmp, source, "q\n", &["rat"]);

        ctl.run().unwrap();
        assert!(released.get());
        assert_eq!(ctl.state(), ControllerState::Terminated);
        assert!(ctl.run().is_err());
    }

    #[test]
    fn test_closed_input_terminates() {
        let tmp = TempDir::new().unwrap();
        let source = MemoryFrameSource::solid(5, 8, 8);
        let released = source.release_flag();
        let mut ctl = controller(&tmp, source, "down 1 1\n", &["rat"]);

        let summary = ctl.run().unwrap();
        assert_eq!(summary.frames_visited, 1);
        assert!(released.get());
    }

    #[test]
    fn test_empty_video_never_browses() {
        let tmp = TempDir::new().unwrap();
        let mut ctl = controller(&tmp, MemoryFrameSource::solid(0, 8, 8), "s\n", &["rat"]);

        let summary = ctl.run().unwrap();
        assert_eq!(summary.frames_visited, 0);
        assert!(ctl.display.shown.is_empty());
    }
}
