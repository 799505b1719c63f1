//! Stage that leaves the slice alone and returns a fixed control flag

use crate::error::{Error, Result};
use crate::simulation::stage::{required, unknown_option, Control, Options, Stage, StageFactory};
use crate::simulation::states::Slice;

const DUMMY_NAME: &str = "dummy";

pub struct DummyFactory;

impl StageFactory for DummyFactory {
    fn name(&self) -> &'static str {
        DUMMY_NAME
    }

    fn explain(&self) -> String {
        [
            "[dummy] Does nothing to the slice. O(1).",
            "[dummy] Options:",
            "[dummy]   ret=ok|abort|exit|repack: control flag returned every step (default: ok)",
            "[dummy] Example: -m dummy[ret=exit]",
        ]
        .join("\n")
    }

    fn configure(&self, options: &str) -> Result<Box<dyn Stage>> {
        let mut ret = Control::OK;
        for (key, value) in Options::parse(options).iter() {
            match key {
                "ret" => {
                    ret = match required(DUMMY_NAME, key, value)? {
                        "ok" => Control::OK,
                        "abort" => Control::ABORT,
                        "exit" => Control::EXIT,
                        "repack" => Control::REPACK,
                        other => {
                            return Err(Error::config(format!(
                                "[{DUMMY_NAME}] ret must be one of ok, abort, exit or repack (got {other})"
                            )))
                        }
                    }
                }
                other => return Err(unknown_option(DUMMY_NAME, other, &["ret"])),
            }
        }
        Ok(Box::new(Dummy { ret }))
    }
}

pub struct Dummy {
    pub ret: Control,
}

impl Stage for Dummy {
    fn name(&self) -> &'static str {
        DUMMY_NAME
    }

    fn execute(&mut self, _prev: &Slice, _cur: &mut Slice) -> Control {
        self.ret
    }
}
