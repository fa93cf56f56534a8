use crate::capture::SpeechEngine;
use crate::common::{RecognitionErrorCode, VerifyError, Result};
use crate::core::phrase::Transcript;
use std::io::{self, BufRead, BufReader, Stdin};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

/// Speech engine stand-in that takes the "transcript" from a line of text.
///
/// Used by the CLI when no recognizer is wired in; typed input is treated as
/// a perfectly confident recognition.
pub struct ConsoleSpeechEngine<R> {
    input: Mutex<R>,
    released: AtomicBool,
}

impl ConsoleSpeechEngine<BufReader<Stdin>> {
    pub fn stdin() -> Self {
        Self::new(BufReader::new(io::stdin()))
    }
}

impl<R: BufRead + Send> ConsoleSpeechEngine<R> {
    pub fn new(input: R) -> Self {
        Self {
            input: Mutex::new(input),
            released: AtomicBool::new(false),
        }
    }
}

impl<R: BufRead + Send> SpeechEngine for ConsoleSpeechEngine<R> {
    fn listen(&self) -> Result<Transcript> {
        if self.released.load(Ordering::Acquire) {
            return Err(VerifyError::Recognition(RecognitionErrorCode::Aborted));
        }

        let mut input = self
            .input
            .lock()
            .map_err(|_| VerifyError::Recognition(RecognitionErrorCode::Engine("input lock poisoned".into())))?;

        let mut line = String::new();
        let read = input
            .read_line(&mut line)
            .map_err(|_| VerifyError::Recognition(RecognitionErrorCode::AudioCapture))?;

        // EOF or a blank line: nothing was said
        if read == 0 || line.trim().is_empty() {
            return Err(VerifyError::Recognition(RecognitionErrorCode::NoSpeech));
        }

        Ok(Transcript::new(line.trim(), 1.0))
    }

    fn release(&self) {
        self.released.store(true, Ordering::Release);
    }
}
