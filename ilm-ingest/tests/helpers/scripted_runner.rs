//! Scripted `CommandRunner` for driving the pipeline without real tools
//!
//! Each program name (file name of `ProcessSpec::program`) maps to a handler
//! closure. Unscripted programs fail like a missing binary.

use async_trait::async_trait;
use ilm_ingest::utils::{CommandRunner, ProcessError, ProcessOutput, ProcessSpec};
use std::collections::HashMap;
use std::io;
use std::path::PathBuf;
use std::sync::Mutex;

type Handler = Box<dyn Fn(&ProcessSpec) -> Result<ProcessOutput, ProcessError> + Send + Sync>;

/// One recorded invocation: program name followed by its arguments
pub type RecordedCall = Vec<String>;

#[derive(Default)]
pub struct ScriptedRunner {
    handlers: HashMap<String, Handler>,
    calls: Mutex<Vec<RecordedCall>>,
}

impl ScriptedRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Script `program`
    pub fn on<F>(mut self, program: &str, handler: F) -> Self
    where
        F: Fn(&ProcessSpec) -> Result<ProcessOutput, ProcessError> + Send + Sync + 'static,
    {
        self.handlers.insert(program.to_string(), Box::new(handler));
        self
    }

    /// Every invocation so far, in order
    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().unwrap().clone()
    }

    /// Invocations of `program`
    pub fn calls_to(&self, program: &str) -> Vec<RecordedCall> {
        self.calls()
            .into_iter()
            .filter(|call| call.first().map(String::as_str) == Some(program))
            .collect()
    }
}

#[async_trait]
impl CommandRunner for ScriptedRunner {
    async fn run(&self, spec: &ProcessSpec) -> Result<ProcessOutput, ProcessError> {
        let program = spec.program_name();
        let mut call = vec![program.clone()];
        call.extend(spec.args.iter().map(|a| a.to_string_lossy().to_string()));
        self.calls.lock().unwrap().push(call);

        match self.handlers.get(&program) {
            Some(handler) => handler(spec),
            None => Err(ProcessError::Spawn {
                program,
                source: io::Error::new(io::ErrorKind::NotFound, "No such file or directory"),
            }),
        }
    }
}

/// Successful run printing `stdout`
pub fn ok(stdout: &str) -> Result<ProcessOutput, ProcessError> {
    Ok(ProcessOutput {
        stdout: stdout.to_string(),
        stderr: String::new(),
    })
}

/// Failed run with exit code 1 and `stderr`
pub fn fail(spec: &ProcessSpec, stderr: &str) -> Result<ProcessOutput, ProcessError> {
    Err(ProcessError::NonZeroExit {
        program: spec.program_name(),
        code: Some(1),
        stdout: String::new(),
        stderr: stderr.to_string(),
    })
}

/// Value following `flag` in the arguments
pub fn arg_after(spec: &ProcessSpec, flag: &str) -> Option<String> {
    let index = spec.args.iter().position(|a| a == flag)?;
    spec.arg_str(index + 1)
}

/// ffmpeg stand-in: copy the first `-i` input to the output path (last argument)
pub fn copy_input_to_output(spec: &ProcessSpec) -> Result<ProcessOutput, ProcessError> {
    let input = arg_after(spec, "-i").expect("ffmpeg call without -i");
    let output = spec.last_arg_path().expect("ffmpeg call without output");
    std::fs::copy(&input, output).expect("copy input to output");
    ok("")
}

/// ffmpeg stand-in: write a small RIFF header to the output path
pub fn write_wav_output(spec: &ProcessSpec) -> Result<ProcessOutput, ProcessError> {
    let output = spec.last_arg_path().expect("ffmpeg call without output");
    std::fs::write(output, b"RIFF\x00\x00\x00\x00WAVE").expect("write wav");
    ok("")
}

/// yt-dlp stand-in: create the file named by the `-o` template with extension `ext`
pub fn write_download(spec: &ProcessSpec, ext: &str) -> Result<ProcessOutput, ProcessError> {
    let template = arg_after(spec, "-o").expect("download without -o");
    let path = PathBuf::from(template.replace("%(ext)s", ext));
    std::fs::write(&path, b"ID3\x04\x00\x00\x00\x00\x00\x00audio").expect("write download");
    ok("")
}
