use as_any::AsAny;

use slotstream_core::StreamTag;

use crate::stream::{StreamOperator, StreamWindow};

struct Stage<T> {
    op: Box<dyn StreamOperator<T>>,
    /// Input samples not yet consumed by this stage
    queue: Vec<T>,
    /// Absolute offset of `queue[0]` on this stage's input stream
    queue_offset: u64,
    /// Pending input tags, absolute offsets
    tags: Vec<StreamTag>,
}

/// Owns a chain of boxed operators over one homogeneous stream segment
/// and drives windows through them.
///
/// This is wiring plumbing for the library and its tests, not a general
/// block-graph scheduler: stages run in order on the calling thread,
/// each stage carries its unconsumed input (and the tags attached to
/// it) to the next call, and back-pressure is simply "whatever a stage
/// leaves in its queue".
pub struct Pipeline<T> {
    stages: Vec<Stage<T>>,
}

impl<T: Copy + Default + 'static> Pipeline<T> {
    pub fn new() -> Pipeline<T> {
        Pipeline { stages: Vec::new() }
    }

    pub fn add_stage(&mut self, op: Box<dyn StreamOperator<T>>) {
        self.stages.push(Stage { op, queue: Vec::new(), queue_offset: 0, tags: Vec::new() });
    }

    pub fn num_stages(&self) -> usize {
        self.stages.len()
    }

    /// Mutable access to the concrete block behind stage `index`
    pub fn stage_mut<B: 'static>(&mut self, index: usize) -> Option<&mut B> {
        self.stages.get_mut(index)?.op.as_any_mut().downcast_mut::<B>()
    }

    /// Pushes one source window into the first stage and drains the
    /// chain. Returns the samples and tags produced by the last stage.
    pub fn run(&mut self, samples: &[T], tags: &[StreamTag]) -> (Vec<T>, Vec<StreamTag>) {
        let mut carry_samples = samples.to_vec();
        let mut carry_tags = tags.to_vec();

        for stage in self.stages.iter_mut() {
            stage.queue.extend_from_slice(&carry_samples);
            stage.tags.extend(carry_tags.drain(..));

            let mut produced_samples: Vec<T> = Vec::new();
            let mut produced_tags: Vec<StreamTag> = Vec::new();

            // drain the stage until it stops making progress
            loop {
                let n_in = stage.queue.len();
                if n_in == 0 {
                    break;
                }
                let mut out = vec![T::default(); n_in];
                let window = StreamWindow::new(&stage.queue, stage.queue_offset, &stage.tags);
                let result = stage.op.work(&window, &mut out, &mut produced_tags);

                if result.consumed == 0 && result.produced == 0 {
                    break;
                }
                tracing::trace!(
                    "{}: consumed {} produced {}",
                    stage.op.name(), result.consumed, result.produced
                );

                out.truncate(result.produced);
                produced_samples.extend_from_slice(&out);

                stage.queue.drain(..result.consumed);
                stage.queue_offset += result.consumed as u64;
                // tags on consumed samples were delivered; the rest are
                // re-delivered with the next window
                let consumed_offset = stage.queue_offset;
                stage.tags.retain(|t| t.offset >= consumed_offset);
            }

            carry_samples = produced_samples;
            carry_tags = produced_tags;
        }

        (carry_samples, carry_tags)
    }
}

impl<T: Copy + Default + 'static> Default for Pipeline<T> {
    fn default() -> Self {
        Pipeline::new()
    }
}
