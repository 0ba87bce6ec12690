//! Composable rewriting of element streams
//!
//! Classes, fields, methods, and code are all modeled as streams of elements, and builders
//! consume those streams. A [`Transform`] sits in front of a builder: it sees every element of the
//! source, and decides what (if anything) to emit in its place by calling [`ElementSink::with`]
//! on the builder. Anything a transform doesn't care about should be passed along unchanged.
//!
//! Transforms compose into a [`Pipeline`]. Each stage of the pipeline sees exactly what the stage
//! before it emitted, and whatever the last stage emits is stored in the builder:
//!
//! ```text,ignore,no_run
//!   source elements ──► stage 0 ──► stage 1 ──► ... ──► builder storage
//! ```
//!
//! The builder keeps track of which stage is currently running, so calling `with` from inside a
//! stage always reaches the next one.

mod adapters;
mod code;

pub use adapters::*;
pub use code::*;

use crate::errors::Error;

/// Element-level rewrite in front of a builder of type `B`, consuming elements of type `E`
pub trait Transform<B, E> {
    /// Handle one element of the source
    fn accept(&mut self, builder: &mut B, element: E) -> Result<(), Error>;

    /// Called before the first element
    fn at_start(&mut self, _builder: &mut B) -> Result<(), Error> {
        Ok(())
    }

    /// Called after the last element
    fn at_end(&mut self, _builder: &mut B) -> Result<(), Error> {
        Ok(())
    }
}

impl<B, E, F> Transform<B, E> for F
where
    F: FnMut(&mut B, E) -> Result<(), Error>,
{
    fn accept(&mut self, builder: &mut B, element: E) -> Result<(), Error> {
        self(builder, element)
    }
}

/// Ordered list of transforms (the first one sees the source elements)
pub struct Pipeline<B, E> {
    stages: Vec<Box<dyn Transform<B, E>>>,
}

impl<B, E> Pipeline<B, E> {
    /// Pipeline that passes every element through
    pub fn identity() -> Pipeline<B, E> {
        Pipeline { stages: vec![] }
    }

    pub fn new(transform: impl Transform<B, E> + 'static) -> Pipeline<B, E> {
        Pipeline {
            stages: vec![Box::new(transform)],
        }
    }

    /// Add a stage that will see what the current last stage emits
    pub fn and_then(mut self, transform: impl Transform<B, E> + 'static) -> Pipeline<B, E> {
        self.stages.push(Box::new(transform));
        self
    }

    /// Append all the stages of another pipeline
    pub fn extend(mut self, other: Pipeline<B, E>) -> Pipeline<B, E> {
        self.stages.extend(other.stages);
        self
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }
}

impl<B, E> Default for Pipeline<B, E> {
    fn default() -> Self {
        Pipeline::identity()
    }
}

/// `t1.and_then(t2)` on any transform
pub trait TransformExt<B, E>: Transform<B, E> + Sized + 'static {
    fn and_then(self, next: impl Transform<B, E> + 'static) -> Pipeline<B, E> {
        Pipeline::new(self).and_then(next)
    }
}

impl<B, E, T: Transform<B, E> + 'static> TransformExt<B, E> for T {}

/// Stages installed in a builder, along with the stage currently running
pub struct Stages<B, E> {
    /// A stage is `None` while it is running
    stages: Vec<Option<Box<dyn Transform<B, E>>>>,

    /// Index of the stage the next emitted element goes to
    depth: usize,
}

impl<B, E> Stages<B, E> {
    pub fn new(pipeline: Pipeline<B, E>) -> Stages<B, E> {
        Stages {
            stages: pipeline.stages.into_iter().map(Some).collect(),
            depth: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }
}

impl<B, E> Default for Stages<B, E> {
    fn default() -> Self {
        Stages::new(Pipeline::identity())
    }
}

/// Builder consuming a stream of `E` elements through its installed stages
pub trait ElementSink<E>: Sized {
    /// Record an element that made it through every stage
    fn store(&mut self, element: E) -> Result<(), Error>;

    fn stages(&mut self) -> &mut Stages<Self, E>;

    /// Emit an element to the next stage (or the builder itself, past the last stage)
    fn with(&mut self, element: E) -> Result<&mut Self, Error> {
        let depth = self.stages().depth;
        let stage = match self.stages().stages.get_mut(depth) {
            None => {
                self.store(element)?;
                return Ok(self);
            }
            Some(stage) => stage.take(),
        };

        // Stage is already running further up the call stack
        let Some(mut stage) = stage else {
            self.store(element)?;
            return Ok(self);
        };
        self.stages().depth = depth + 1;
        let result = stage.accept(self, element);
        let stages = self.stages();
        stages.depth = depth;
        stages.stages[depth] = Some(stage);
        result.map(|()| self)
    }

    /// Run the `at_start` hooks (downstream stages first)
    fn start_stages(&mut self) -> Result<(), Error> {
        for depth in (0..self.stages().stages.len()).rev() {
            self.run_hook(depth, |stage, builder| stage.at_start(builder))?;
        }
        Ok(())
    }

    /// Run the `at_end` hooks (upstream stages first)
    fn end_stages(&mut self) -> Result<(), Error> {
        for depth in 0..self.stages().stages.len() {
            self.run_hook(depth, |stage, builder| stage.at_end(builder))?;
        }
        Ok(())
    }

    #[doc(hidden)]
    fn run_hook(
        &mut self,
        depth: usize,
        hook: impl FnOnce(&mut dyn Transform<Self, E>, &mut Self) -> Result<(), Error>,
    ) -> Result<(), Error> {
        let Some(mut stage) = self.stages().stages[depth].take() else {
            return Ok(());
        };
        let outer_depth = self.stages().depth;
        self.stages().depth = depth + 1;
        let result = hook(stage.as_mut(), self);
        let stages = self.stages();
        stages.depth = outer_depth;
        stages.stages[depth] = Some(stage);
        result
    }

    /// Run `body` with the stages of `pipeline` in front of wherever its elements would go
    ///
    /// Elements emitted by `body` pass through the spliced stages first, then through the stages
    /// that follow the current one. The spliced stages' hooks run around `body`, and the stages
    /// are removed again afterwards.
    fn transforming<R>(
        &mut self,
        pipeline: Pipeline<Self, E>,
        body: impl FnOnce(&mut Self) -> Result<R, Error>,
    ) -> Result<R, Error> {
        let depth = self.stages().depth;
        let count = pipeline.stages.len();
        self.stages()
            .stages
            .splice(depth..depth, pipeline.stages.into_iter().map(Some));

        let result: Result<R, Error> = (|| {
            for spliced in (depth..depth + count).rev() {
                self.run_hook(spliced, |stage, builder| stage.at_start(builder))?;
            }
            let value = body(self)?;
            for spliced in depth..depth + count {
                self.run_hook(spliced, |stage, builder| stage.at_end(builder))?;
            }
            Ok(value)
        })();

        self.stages().stages.drain(depth..depth + count);
        result
    }

    /// Feed a whole source stream through the stages, hooks included
    fn run(&mut self, elements: impl IntoIterator<Item = E>) -> Result<(), Error> {
        self.start_stages()?;
        for element in elements {
            self.with(element)?;
        }
        self.end_stages()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    /// Builder that just records what it is given
    #[derive(Default)]
    struct Recorder {
        seen: Vec<String>,
        stages: Stages<Recorder, String>,
    }

    impl ElementSink<String> for Recorder {
        fn store(&mut self, element: String) -> Result<(), Error> {
            self.seen.push(element);
            Ok(())
        }

        fn stages(&mut self) -> &mut Stages<Recorder, String> {
            &mut self.stages
        }
    }

    struct Tagged(&'static str);

    impl Transform<Recorder, String> for Tagged {
        fn accept(&mut self, builder: &mut Recorder, element: String) -> Result<(), Error> {
            builder.with(format!("{}{}", element, self.0))?;
            Ok(())
        }

        fn at_start(&mut self, builder: &mut Recorder) -> Result<(), Error> {
            builder.with(format!("start{}", self.0))?;
            Ok(())
        }

        fn at_end(&mut self, builder: &mut Recorder) -> Result<(), Error> {
            builder.with(format!("end{}", self.0))?;
            Ok(())
        }
    }

    fn run(pipeline: Pipeline<Recorder, String>, source: &[&str]) -> Vec<String> {
        let mut recorder = Recorder {
            seen: vec![],
            stages: Stages::new(pipeline),
        };
        recorder
            .run(source.iter().map(|s| s.to_string()))
            .unwrap();
        recorder.seen
    }

    #[test]
    fn identity_passes_everything() {
        assert_eq!(run(Pipeline::identity(), &["a", "b"]), vec!["a", "b"]);
    }

    #[test]
    fn stages_see_what_the_previous_stage_emitted() {
        let pipeline = Tagged("1").and_then(Tagged("2"));
        assert_eq!(
            run(pipeline, &["a"]),
            vec!["start2", "start12", "a12", "end12", "end2"],
            "start hooks run downstream first, end hooks upstream first"
        );
    }

    #[test]
    fn closures_can_drop_and_duplicate() {
        let drop_b = |builder: &mut Recorder, element: String| -> Result<(), Error> {
            if element != "b" {
                builder.with(element)?;
            }
            Ok(())
        };
        let double = |builder: &mut Recorder, element: String| -> Result<(), Error> {
            builder.with(element.clone())?.with(element)?;
            Ok(())
        };
        assert_eq!(
            run(drop_b.and_then(double), &["a", "b", "c"]),
            vec!["a", "a", "c", "c"]
        );
    }

    #[test]
    fn transforming_splices_stages_for_one_body() {
        let mut recorder = Recorder {
            seen: vec![],
            stages: Stages::new(Pipeline::new(Tagged("1"))),
        };
        recorder.with(String::from("a")).unwrap();
        recorder
            .transforming(Pipeline::new(Tagged("x")), |recorder| {
                recorder.with(String::from("b"))?;
                Ok(())
            })
            .unwrap();
        recorder.with(String::from("c")).unwrap();
        assert_eq!(
            recorder.seen,
            vec!["a1", "startx1", "bx1", "endx1", "c1"],
            "spliced stages feed the installed ones, and only while the body runs"
        );
        assert_eq!(recorder.stages.len(), 1);
    }

    #[test]
    fn transforming_from_inside_a_stage() {
        // Nested sub-streams land between the running stage and the ones after it
        let nested = |builder: &mut Recorder, element: String| -> Result<(), Error> {
            builder.transforming(Pipeline::new(Tagged("x")), |builder| {
                builder.with(element)?;
                Ok(())
            })
        };
        assert_eq!(
            run(nested.and_then(Tagged("2")), &["a"]),
            vec!["start2", "startx2", "ax2", "endx2", "end2"]
        );
    }

    #[test]
    fn errors_propagate() {
        let fail = |_: &mut Recorder, _: String| -> Result<(), Error> { Err(Error::FallsOffEnd) };
        let mut recorder = Recorder {
            seen: vec![],
            stages: Stages::new(Pipeline::new(fail)),
        };
        assert!(matches!(
            recorder.with(String::from("a")),
            Err(Error::FallsOffEnd)
        ));
        assert!(recorder.seen.is_empty());
    }
}
