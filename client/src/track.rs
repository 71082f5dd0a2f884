//! Track segment layouts
//!
//! Each level is a hand-placed arrangement of road strips and mud pits laid
//! out relative to the centre of the play field. Strips are chained by their
//! edges so the road stays continuous on any field width.

use shared::{Rect, Vector2};

/// Width/height ratio of the road artwork.
const ROAD_RATIO: f32 = 165.0 / 231.0;
const ROAD_LENGTH: f32 = 150.0;
const MUD_SIZE: f32 = 35.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Piece {
    /// Vertical straight.
    Straight,
    /// Square junction or short sideways strip.
    Junction,
}

impl Piece {
    fn size(self) -> (f32, f32) {
        match self {
            Piece::Straight => (ROAD_LENGTH * ROAD_RATIO, ROAD_LENGTH),
            Piece::Junction => (ROAD_LENGTH * ROAD_RATIO, ROAD_LENGTH * ROAD_RATIO),
        }
    }

    fn at(self, x: f32, y: f32) -> Rect {
        let (width, height) = self.size();
        Rect::new(Vector2::new(x, y), width, height)
    }
}

/// Road and mud zones of one track segment.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Track {
    pub level: u32,
    pub roads: Vec<Rect>,
    pub mud: Vec<Rect>,
}

impl Track {
    /// Builds the layout for `level`. Levels past the last segment are empty.
    pub fn for_level(level: u32, field_width: f32) -> Self {
        let mid = field_width / 2.0;
        let (roads, mud) = match level {
            1 => level_one(mid),
            2 => level_two(mid),
            3 => level_three(mid),
            _ => (Vec::new(), Vec::new()),
        };
        Self { level, roads, mud }
    }

    pub fn on_road(&self, car: &Rect) -> bool {
        self.roads.iter().any(|road| road.intersects(car))
    }

    pub fn in_mud(&self, car: &Rect) -> bool {
        self.mud.iter().any(|pit| pit.intersects(car))
    }
}

fn above(below: &Rect, piece: Piece) -> Rect {
    let (_, height) = piece.size();
    piece.at(below.center.x, below.top() + height / 2.0)
}

fn left_of(right: &Rect, piece: Piece) -> Rect {
    let (width, _) = piece.size();
    piece.at(right.left() - width / 2.0, right.center.y)
}

fn right_of(left: &Rect, piece: Piece) -> Rect {
    let (width, _) = piece.size();
    piece.at(left.right() + width / 2.0, left.center.y)
}

fn pit(x: f32, y: f32) -> Rect {
    Rect::new(Vector2::new(x, y), MUD_SIZE, MUD_SIZE)
}

/// Splits into two long lanes around a central island, then merges.
fn level_one(mid: f32) -> (Vec<Rect>, Vec<Rect>) {
    let (_, straight_height) = Piece::Straight.size();
    let entry = Piece::Straight.at(mid, straight_height / 2.0);
    let lower_merge = above(&entry, Piece::Junction);
    let lower_left = left_of(&lower_merge, Piece::Junction);
    let lower_right = right_of(&lower_merge, Piece::Junction);
    let left_lane = above(&lower_left, Piece::Straight);
    let right_lane = above(&lower_right, Piece::Straight);
    let upper_left = above(&left_lane, Piece::Junction);
    let upper_right = above(&right_lane, Piece::Junction);
    let upper_merge = Piece::Junction.at(lower_merge.center.x, upper_right.center.y);
    let exit = above(&upper_merge, Piece::Straight);
    let overflow = above(&exit, Piece::Straight);

    let quarter_w = left_lane.width / 4.0;
    let quarter_h = left_lane.height / 4.0;
    let mud = vec![
        pit(left_lane.center.x + quarter_w, left_lane.center.y - quarter_h),
        pit(right_lane.center.x + quarter_w, right_lane.center.y - quarter_h),
        pit(left_lane.center.x - quarter_w, left_lane.center.y + quarter_h),
        pit(right_lane.center.x - quarter_w, right_lane.center.y + quarter_h),
        pit(exit.center.x - exit.width / 4.0, exit.center.y),
    ];

    let roads = vec![
        entry,
        lower_merge,
        lower_left,
        lower_right,
        left_lane,
        right_lane,
        upper_left,
        upper_right,
        upper_merge,
        exit,
        overflow,
    ];
    (roads, mud)
}

/// An S-bend: up the left, across the middle, up the right, back to centre.
fn level_two(mid: f32) -> (Vec<Rect>, Vec<Rect>) {
    let (_, junction_height) = Piece::Junction.size();
    let entry = Piece::Junction.at(mid, junction_height / 2.0);
    let lower_left = left_of(&entry, Piece::Junction);
    let left_lane = above(&lower_left, Piece::Straight);
    let middle_left = above(&left_lane, Piece::Junction);
    let crossing = Piece::Junction.at(entry.center.x, middle_left.center.y);
    let middle_right = right_of(&crossing, Piece::Junction);
    let right_lane = above(&middle_right, Piece::Straight);
    let upper_right = above(&right_lane, Piece::Junction);
    let upper_merge = Piece::Junction.at(entry.center.x, upper_right.center.y);
    let exit = above(&upper_merge, Piece::Straight);

    let lane_x = right_lane.center.x - right_lane.width / 4.0;
    let mud = vec![
        pit(
            crossing.center.x - crossing.width / 4.0,
            crossing.center.y - crossing.height / 4.0,
        ),
        pit(lane_x, right_lane.center.y - right_lane.height / 4.0),
        pit(lane_x, right_lane.center.y),
        pit(lane_x, right_lane.center.y + right_lane.height / 4.0),
        pit(
            upper_merge.center.x + upper_merge.width / 4.0,
            upper_merge.center.y,
        ),
    ];

    let roads = vec![
        entry,
        lower_left,
        left_lane,
        middle_left,
        crossing,
        middle_right,
        right_lane,
        upper_right,
        upper_merge,
        exit,
    ];
    (roads, mud)
}

/// A straight sprint with mud alternating left and right.
fn level_three(mid: f32) -> (Vec<Rect>, Vec<Rect>) {
    let (_, straight_height) = Piece::Straight.size();
    let mut roads = vec![Piece::Straight.at(mid, straight_height / 2.0)];
    for _ in 1..5 {
        let next = above(&roads[roads.len() - 1], Piece::Straight);
        roads.push(next);
    }

    let mud = roads
        .iter()
        .enumerate()
        .map(|(i, strip)| {
            let offset = strip.width / 4.0;
            let x = if i % 2 == 0 {
                strip.center.x - offset
            } else {
                strip.center.x + offset
            };
            pit(x, strip.center.y)
        })
        .collect();

    (roads, mud)
}
