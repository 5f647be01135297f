use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::chapter::{LanguageTag, ParagraphRecord};

/// Grace period after a resume request before checking that the engine
/// actually resumed. Some hosts silently drop a paused utterance.
pub const RESUME_GRACE: Duration = Duration::from_millis(180);

/// Bound on consecutive advances without an intervening `Started` event.
/// Trips when a pathological engine fires completion callbacks in a tight
/// synchronous loop.
pub const MAX_ADVANCE_DEPTH: u32 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VisibilityFilter {
    #[default]
    Both,
    Source,
    Target,
}

/// One entry of the playback queue. `original_index` always refers back to
/// the unfiltered paragraph stream, so highlighting and saved progress stay
/// correct under any filter.
#[derive(Debug, Clone, PartialEq)]
pub struct QueueItem {
    pub text: String,
    pub lang: LanguageTag,
    pub original_index: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Utterance {
    pub id: u64,
    pub text: String,
    pub lang: LanguageTag,
    pub rate: f32,
    pub pitch: f32,
}

/// The host speech-synthesis engine, reduced to the commands and queries the
/// scheduler needs. Events come back through [`Player::handle_event`].
pub trait SpeechEngine {
    fn speak(&mut self, utterance: Utterance);
    fn cancel(&mut self);
    fn pause(&mut self);
    fn resume(&mut self);
    fn is_paused(&self) -> bool;
    /// Speaking or with an utterance pending.
    fn is_busy(&self) -> bool;
}

/// Best-effort display wake lock. Acquisition failures are swallowed by the
/// implementation; the scheduler never learns about them.
pub trait WakeLock {
    fn acquire(&mut self);
    fn release(&mut self);
}

pub struct NoopWakeLock;

impl WakeLock for NoopWakeLock {
    fn acquire(&mut self) {}
    fn release(&mut self) {}
}

/// Receives the resume position after each fully spoken paragraph.
pub trait ProgressSink {
    fn save(&mut self, chapter: &str, next_index: usize);
}

/// Per-utterance lifecycle events, dispatched by the host. The id echoes the
/// utterance it belongs to; events for anything but the in-flight utterance
/// are stale and ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineEvent {
    Started { id: u64 },
    Ended { id: u64 },
    Failed { id: u64 },
}

/// Side effects the host must carry out; the scheduler never touches the
/// page directly.
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    /// Highlight and scroll to a paragraph of the unfiltered stream.
    Highlight { paragraph: usize },
    ClearHighlight,
    /// Call [`Player::verify_resume`] after the delay.
    ScheduleResumeCheck { delay: Duration },
    ReportError { message: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VoiceSettings {
    pub rate: f32,
    pub pitch: f32,
}

impl Default for VoiceSettings {
    fn default() -> Self {
        Self {
            rate: 1.0,
            pitch: 1.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct PlayerSettings {
    pub source_voice: VoiceSettings,
    pub target_voice: VoiceSettings,
    pub visibility: VisibilityFilter,
}

/// Filters a paragraph stream into a playback queue, preserving original
/// indices.
pub fn build_queue(paragraphs: &[ParagraphRecord], filter: VisibilityFilter) -> Vec<QueueItem> {
    paragraphs
        .iter()
        .filter(|p| match filter {
            VisibilityFilter::Both => true,
            VisibilityFilter::Source => p.lang == LanguageTag::Source,
            VisibilityFilter::Target => p.lang == LanguageTag::Target,
        })
        .map(|p| QueueItem {
            text: p.text.clone(),
            lang: p.lang,
            original_index: p.index,
        })
        .collect()
}

/// The playback scheduler: a single controller owning queue and cursor,
/// cooperatively driven by engine events and user actions. Never blocks;
/// every wait is a deferred effect the host schedules.
pub struct Player<E, W, P> {
    engine: E,
    wake: W,
    progress: P,
    chapter: String,
    paragraphs: Vec<ParagraphRecord>,
    settings: PlayerSettings,

    queue: Vec<QueueItem>,
    position: Option<usize>,
    user_paused: bool,
    utterance_seq: u64,
    in_flight: Option<u64>,
    advance_depth: u32,
    halted: bool,
}

impl<E: SpeechEngine, W: WakeLock, P: ProgressSink> Player<E, W, P> {
    pub fn new(engine: E, wake: W, progress: P, settings: PlayerSettings) -> Self {
        Self {
            engine,
            wake,
            progress,
            chapter: String::new(),
            paragraphs: Vec::new(),
            settings,
            queue: Vec::new(),
            position: None,
            user_paused: false,
            utterance_seq: 0,
            in_flight: None,
            advance_depth: 0,
            halted: false,
        }
    }

    pub fn is_idle(&self) -> bool {
        self.position.is_none()
    }

    pub fn is_halted(&self) -> bool {
        self.halted
    }

    pub fn current_original_index(&self) -> Option<usize> {
        self.position.map(|pos| self.queue[pos].original_index)
    }

    /// Id of the in-flight utterance, for hosts correlating engine events.
    pub fn current_utterance(&self) -> Option<u64> {
        self.in_flight
    }

    pub fn queue(&self) -> &[QueueItem] {
        self.queue.as_slice()
    }

    /// Loads a chapter's paragraph stream, stopping any playback first.
    pub fn set_chapter(
        &mut self,
        chapter: impl Into<String>,
        paragraphs: Vec<ParagraphRecord>,
        effects: &mut Vec<Effect>,
    ) {
        self.stop(effects);
        self.chapter = chapter.into();
        self.paragraphs = paragraphs;
        self.queue.clear();
        self.halted = false;
    }

    /// Starts speaking at the paragraph with the given original index.
    ///
    /// Cancels anything in flight, rebuilds the queue under the current
    /// visibility filter and falls back to the first queue position when the
    /// requested paragraph is filtered out.
    pub fn play_from(&mut self, from_index: usize, effects: &mut Vec<Effect>) {
        if self.halted {
            return;
        }

        self.engine.cancel();
        self.in_flight = None;
        self.user_paused = false;
        self.advance_depth = 0;

        self.queue = build_queue(&self.paragraphs, self.settings.visibility);
        if self.queue.is_empty() {
            self.position = None;
            self.wake.release();
            return;
        }

        let pos = self
            .queue
            .iter()
            .position(|item| item.original_index == from_index)
            .unwrap_or(0);
        self.position = Some(pos);

        self.wake.acquire();
        self.speak_current(effects);
    }

    pub fn pause(&mut self, _effects: &mut Vec<Effect>) {
        if self.position.is_none() {
            return;
        }
        tracing::debug!("pausing playback");
        self.user_paused = true;
        self.engine.pause();
    }

    /// Requests an engine resume and schedules a verification check; the
    /// host must call [`Self::verify_resume`] after the effect's delay.
    pub fn resume(&mut self, effects: &mut Vec<Effect>) {
        if self.position.is_none() {
            return;
        }
        tracing::debug!("resuming playback");
        self.user_paused = false;
        self.engine.resume();
        effects.push(Effect::ScheduleResumeCheck {
            delay: RESUME_GRACE,
        });
    }

    /// Post-resume check: when the engine is still paused, or idle with
    /// nothing pending, the paused utterance was dropped. Compensate by
    /// restarting the same paragraph instead of leaving playback stuck.
    pub fn verify_resume(&mut self, effects: &mut Vec<Effect>) {
        if self.halted || self.position.is_none() || self.user_paused {
            return;
        }
        if self.engine.is_paused() || !self.engine.is_busy() {
            tracing::warn!("resume fell through; restarting current paragraph");
            self.engine.cancel();
            self.speak_current(effects);
        }
    }

    pub fn stop(&mut self, effects: &mut Vec<Effect>) {
        self.engine.cancel();
        self.in_flight = None;
        self.position = None;
        self.user_paused = false;
        self.advance_depth = 0;
        effects.push(Effect::ClearHighlight);
        self.wake.release();
    }

    /// A tap on a paragraph: toggles pause/resume when it is the one under
    /// the cursor, otherwise restarts playback from it.
    pub fn click(&mut self, paragraph_index: usize, effects: &mut Vec<Effect>) {
        if self.current_original_index() == Some(paragraph_index) {
            if self.user_paused || self.engine.is_paused() {
                self.resume(effects);
            } else {
                self.pause(effects);
            }
            return;
        }
        self.play_from(paragraph_index, effects);
    }

    /// Changing the filter invalidates the queue structure; playback is
    /// cancelled outright rather than translating the cursor.
    pub fn set_visibility(&mut self, filter: VisibilityFilter, effects: &mut Vec<Effect>) {
        self.settings.visibility = filter;
        self.stop(effects);
    }

    pub fn set_voice(&mut self, lang: LanguageTag, voice: VoiceSettings) {
        match lang {
            LanguageTag::Source => self.settings.source_voice = voice,
            LanguageTag::Target => self.settings.target_voice = voice,
        }
    }

    /// The page became visible again; the host may have silently revoked the
    /// wake lock while hidden.
    pub fn page_visible(&mut self) {
        if self.position.is_some() && !self.user_paused {
            self.wake.acquire();
        }
    }

    pub fn handle_event(&mut self, event: EngineEvent, effects: &mut Vec<Effect>) {
        if self.halted {
            return;
        }
        let (id, kind) = match event {
            EngineEvent::Started { id } => (id, "started"),
            EngineEvent::Ended { id } => (id, "ended"),
            EngineEvent::Failed { id } => (id, "failed"),
        };
        if self.in_flight != Some(id) {
            tracing::debug!(id, kind, "ignoring stale engine event");
            return;
        }
        let Some(pos) = self.position else {
            return;
        };

        match event {
            EngineEvent::Started { .. } => {
                // A real start proves the engine went asynchronous.
                self.advance_depth = 0;
                let item = &self.queue[pos];
                // Source paragraphs are spoken but not highlighted; they
                // echo content the prior highlight already covers.
                if item.lang == LanguageTag::Target {
                    effects.push(Effect::Highlight {
                        paragraph: item.original_index,
                    });
                }
            }
            EngineEvent::Ended { .. } => {
                let next_index = self.queue[pos].original_index + 1;
                let chapter = self.chapter.clone();
                self.progress.save(&chapter, next_index);
                self.advance(effects);
            }
            EngineEvent::Failed { .. } => {
                // Advance like a completion, but never persist a position
                // that failed to render.
                tracing::warn!(position = pos, "utterance failed; advancing without saving");
                self.advance(effects);
            }
        }
    }

    fn advance(&mut self, effects: &mut Vec<Effect>) {
        self.in_flight = None;
        self.advance_depth += 1;
        if self.advance_depth > MAX_ADVANCE_DEPTH {
            self.halted = true;
            self.engine.cancel();
            self.position = None;
            effects.push(Effect::ClearHighlight);
            effects.push(Effect::ReportError {
                message: format!(
                    "playback halted: {MAX_ADVANCE_DEPTH} consecutive synchronous advances"
                ),
            });
            self.wake.release();
            return;
        }

        let Some(pos) = self.position else {
            return;
        };
        let next = pos + 1;
        if next >= self.queue.len() {
            tracing::debug!("end of playback queue");
            self.position = None;
            effects.push(Effect::ClearHighlight);
            self.wake.release();
            return;
        }

        self.position = Some(next);
        self.speak_current(effects);
    }

    fn speak_current(&mut self, _effects: &mut Vec<Effect>) {
        let Some(pos) = self.position else {
            return;
        };
        let item = &self.queue[pos];
        let voice = match item.lang {
            LanguageTag::Source => self.settings.source_voice,
            LanguageTag::Target => self.settings.target_voice,
        };

        self.utterance_seq += 1;
        self.in_flight = Some(self.utterance_seq);
        self.engine.speak(Utterance {
            id: self.utterance_seq,
            text: item.text.clone(),
            lang: item.lang,
            rate: voice.rate,
            pitch: voice.pitch,
        });
    }
}
