//! Scripting module registration
//!
//! Exposes the `lvep` module table to the host's scripting layer:
//!
//! ```text
//! lvep.newVideoStream(file) -> VideoStream
//! lvep.newDecoder(file)     -> Decoder
//! ```
//!
//! Argument 1 may be a file or a file-data object. Construction failures
//! surface through the host's error channel as [`ScriptError::Runtime`].

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use thiserror::Error;

use crate::audio::AudioDecoder;
use crate::config::LvepConfig;
use crate::error::LvepError;
use crate::host::{SoundDecoder, VideoSource};
use crate::io::{FileData, IoBridge, SharedFile};
use crate::sync::{MonotonicTimer, Timer};
use crate::video::VideoStream;

pub const MODULE_NAME: &str = "lvep";

#[derive(Debug, Error)]
pub enum ScriptError {
    #[error("bad argument #{position} to '{function}' ({expected} expected, got {got})")]
    BadArgument {
        function: &'static str,
        position: usize,
        expected: &'static str,
        got: &'static str,
    },
    #[error("{0}")]
    Runtime(String),
}

impl From<LvepError> for ScriptError {
    fn from(e: LvepError) -> Self {
        Self::Runtime(e.to_string())
    }
}

/// A value crossing the scripting boundary.
pub enum Value {
    Nil,
    Boolean(bool),
    Number(f64),
    String(String),
    File(SharedFile),
    FileData(FileData),
    VideoStream(Box<dyn VideoSource>),
    Decoder(Box<dyn SoundDecoder>),
}

impl Value {
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Nil => "nil",
            Self::Boolean(_) => "boolean",
            Self::Number(_) => "number",
            Self::String(_) => "string",
            Self::File(_) => "File",
            Self::FileData(_) => "FileData",
            Self::VideoStream(_) => "VideoStream",
            Self::Decoder(_) => "Decoder",
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Nil => f.write_str("nil"),
            Self::Boolean(b) => write!(f, "{}", b),
            Self::Number(n) => write!(f, "{}", n),
            Self::String(s) => write!(f, "{:?}", s),
            Self::File(file) => write!(f, "File({})", file.lock().filename()),
            Self::FileData(data) => write!(f, "FileData({}, {} bytes)", data.name(), data.len()),
            Self::VideoStream(v) => write!(f, "VideoStream({})", v.filename()),
            Self::Decoder(d) => write!(
                f,
                "Decoder({} Hz, {} channels)",
                d.sample_rate(),
                d.channel_count()
            ),
        }
    }
}

/// State shared by every function of one module instance.
pub struct ModuleContext {
    pub config: LvepConfig,
    pub timer: Arc<dyn Timer>,
}

pub type HostFunction = fn(&ModuleContext, &[Value]) -> Result<Value, ScriptError>;

pub struct Module {
    context: ModuleContext,
    functions: BTreeMap<&'static str, HostFunction>,
}

impl Module {
    pub fn name(&self) -> &'static str {
        MODULE_NAME
    }

    pub fn config(&self) -> &LvepConfig {
        &self.context.config
    }

    pub fn function_names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.functions.keys().copied()
    }

    pub fn call(&self, name: &str, args: &[Value]) -> Result<Value, ScriptError> {
        let Some(function) = self.functions.get(name) else {
            return Err(ScriptError::Runtime(format!(
                "{}.{} is not a function",
                MODULE_NAME, name
            )));
        };
        function(&self.context, args)
    }
}

/// Build the `lvep` module with the default configuration and a monotonic clock.
pub fn open_module() -> Module {
    open_module_with(LvepConfig::default(), Arc::new(MonotonicTimer::new()))
}

pub fn open_module_with(config: LvepConfig, timer: Arc<dyn Timer>) -> Module {
    let mut functions: BTreeMap<&'static str, HostFunction> = BTreeMap::new();
    functions.insert("newVideoStream", new_video_stream);
    functions.insert("newDecoder", new_decoder);
    Module {
        context: ModuleContext { config, timer },
        functions,
    }
}

fn io_argument(function: &'static str, args: &[Value]) -> Result<IoBridge, ScriptError> {
    match args.first() {
        Some(Value::File(file)) => Ok(IoBridge::from_file(file.clone())?),
        Some(Value::FileData(data)) => Ok(IoBridge::from_data(data)),
        other => Err(ScriptError::BadArgument {
            function,
            position: 1,
            expected: "File",
            got: other.map(Value::type_name).unwrap_or("no value"),
        }),
    }
}

pub fn new_video_stream(ctx: &ModuleContext, args: &[Value]) -> Result<Value, ScriptError> {
    let io = io_argument("newVideoStream", args)?;
    let stream = VideoStream::with_timer(io, &ctx.config, ctx.timer.clone())?;
    Ok(Value::VideoStream(Box::new(stream)))
}

pub fn new_decoder(ctx: &ModuleContext, args: &[Value]) -> Result<Value, ScriptError> {
    let io = io_argument("newDecoder", args)?;
    let decoder = AudioDecoder::new(io, &ctx.config)?;
    Ok(Value::Decoder(Box::new(decoder)))
}
