// Composition root - the process-wide playback instances, created once by the host

use crate::config::CoreConfig;
use crate::controller::MusicController;
use crate::error::GenerationError;
use crate::generation::queue::MusicGenerationQueue;
use crate::generation::{GenerationResult, MusicGenerator};
use crate::messaging::notification::UserNotifier;
use crate::midi::output::OutputSynthManager;
use crate::sequencer::transport::SequencerPort;
use crate::session::SessionContext;
use crate::session::song_session::SongPlaybackSession;
use crate::settings::PlaybackSettings;
use crate::song::SongContext;
use std::sync::Arc;
use tracing::info;

pub struct PlaybackServices {
    config: CoreConfig,
    settings: Arc<PlaybackSettings>,
    output: Arc<OutputSynthManager>,
    generator: Arc<dyn MusicGenerator>,
    controller: Arc<MusicController>,
    queue: MusicGenerationQueue,
}

impl PlaybackServices {
    pub fn new(
        config: CoreConfig,
        transport: Arc<dyn SequencerPort>,
        generator: Arc<dyn MusicGenerator>,
        notifier: Arc<dyn UserNotifier>,
    ) -> std::io::Result<Self> {
        Self::with_settings(config, PlaybackSettings::new(Default::default()), transport, generator, notifier)
    }

    /// Same as `new()` with preferences loaded by the host
    pub fn with_settings(
        config: CoreConfig,
        settings: Arc<PlaybackSettings>,
        transport: Arc<dyn SequencerPort>,
        generator: Arc<dyn MusicGenerator>,
        notifier: Arc<dyn UserNotifier>,
    ) -> std::io::Result<Self> {
        let output = OutputSynthManager::new();
        let controller = MusicController::new(config.controller.clone(), transport, Arc::clone(&output))?;
        let queue = MusicGenerationQueue::new(config.queue.clone(), Arc::clone(&generator), notifier);
        info!("Playback services created");
        Ok(Self {
            config,
            settings,
            output,
            generator,
            controller,
            queue,
        })
    }

    pub fn config(&self) -> &CoreConfig {
        &self.config
    }

    pub fn settings(&self) -> &Arc<PlaybackSettings> {
        &self.settings
    }

    pub fn output(&self) -> &Arc<OutputSynthManager> {
        &self.output
    }

    pub fn controller(&self) -> &Arc<MusicController> {
        &self.controller
    }

    pub fn queue(&self) -> &MusicGenerationQueue {
        &self.queue
    }

    /// New song session sharing the services' generator and preferences
    pub fn song_session(&self, context: SongContext, tag: SessionContext) -> Arc<SongPlaybackSession> {
        SongPlaybackSession::new(context, tag, Arc::clone(&self.generator), Arc::clone(&self.settings))
    }

    /// Session built from a queue result
    pub fn session_from_result(
        &self,
        result: &GenerationResult,
        tag: SessionContext,
    ) -> Result<Arc<SongPlaybackSession>, GenerationError> {
        SongPlaybackSession::from_result(result, tag, Arc::clone(&self.settings))
    }
}
