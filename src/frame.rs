use crate::canvas::Canvas;
use crate::flowable::{BreakInside, Flowable};
use crate::types::{Pt, Rect};

pub enum AddResult {
    Placed,
    Split(Box<dyn Flowable>),
    Overflow(Box<dyn Flowable>),
}

pub struct Frame {
    rect: Rect,
    cursor_y: Pt,
}

impl Frame {
    pub fn new(rect: Rect) -> Self {
        Self {
            rect,
            cursor_y: Pt::ZERO,
        }
    }

    pub fn remaining_height(&self) -> Pt {
        (self.rect.height - self.cursor_y).max(Pt::ZERO)
    }

    pub fn rect(&self) -> Rect {
        self.rect
    }

    /// Page y of the next placement.
    pub fn cursor_top(&self) -> Pt {
        self.rect.y + self.cursor_y
    }

    pub fn is_empty(&self) -> bool {
        self.cursor_y <= Pt::ZERO
    }

    pub fn add(&mut self, flowable: Box<dyn Flowable>, canvas: &mut Canvas) -> AddResult {
        let avail_width = self.rect.width;
        let avail_height = self.remaining_height();
        if avail_height <= Pt::ZERO {
            return AddResult::Overflow(flowable);
        }

        let pagination = flowable.pagination();
        let size = flowable.wrap(avail_width, avail_height);
        if matches!(pagination.break_inside, BreakInside::Avoid)
            && size.height > avail_height
            && size.height <= self.rect.height
            && !self.is_empty()
        {
            return AddResult::Overflow(flowable);
        }

        if size.height <= avail_height {
            flowable.draw(canvas, self.rect.x, self.cursor_top(), avail_width, avail_height);
            self.cursor_y += size.height;
            return AddResult::Placed;
        }

        if let Some((first, second)) = flowable.split(avail_width, avail_height) {
            let first_size = first.wrap(avail_width, avail_height);
            if first_size.height > Pt::ZERO && first_size.height <= avail_height {
                first.draw(canvas, self.rect.x, self.cursor_top(), avail_width, avail_height);
                self.cursor_y += first_size.height;
                return AddResult::Split(second);
            }
        }

        // Taller than a whole frame and unsplittable: place it clipped rather than loop forever.
        if self.is_empty() {
            log::warn!(
                "{} does not fit an empty frame ({}pt > {}pt); placed overfull",
                flowable.debug_name(),
                size.height.to_f32(),
                avail_height.to_f32()
            );
            flowable.draw(canvas, self.rect.x, self.cursor_top(), avail_width, avail_height);
            self.cursor_y = self.rect.height;
            return AddResult::Placed;
        }

        AddResult::Overflow(flowable)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flowable::{Paragraph, Spacer};
    use crate::types::Size;

    fn frame(height: f32) -> Frame {
        Frame::new(Rect {
            x: Pt::from_f32(10.0),
            y: Pt::from_f32(20.0),
            width: Pt::from_f32(200.0),
            height: Pt::from_f32(height),
        })
    }

    #[test]
    fn placement_advances_cursor() {
        let mut frame = frame(100.0);
        let mut canvas = Canvas::new(Size::a4());
        assert!(matches!(
            frame.add(Box::new(Paragraph::new("hello")), &mut canvas),
            AddResult::Placed
        ));
        assert_eq!(frame.cursor_top(), Pt::from_f32(20.0) + Pt::from_f32(10.0).mul_ratio(6, 5));
        assert!(!frame.is_empty());
    }

    #[test]
    fn full_frame_overflows() {
        let mut frame = frame(30.0);
        let mut canvas = Canvas::new(Size::a4());
        assert!(matches!(
            frame.add(Box::new(Spacer::new(30.0)), &mut canvas),
            AddResult::Placed
        ));
        assert!(matches!(
            frame.add(Box::new(Paragraph::new("late")), &mut canvas),
            AddResult::Overflow(_)
        ));
    }

    #[test]
    fn long_paragraph_splits_across_frames() {
        let mut frame = frame(60.0);
        let mut canvas = Canvas::new(Size::a4());
        let text = vec!["line"; 10].join("\n");
        assert!(matches!(
            frame.add(Box::new(Paragraph::new(text)), &mut canvas),
            AddResult::Split(_)
        ));
    }
}
