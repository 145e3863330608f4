//! Wavefront OBJ statistics, parsed on the worker thread.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use super::SceneError;
use super::scene::SceneInfo;
use crate::job::{JobContext, JobError};
use crate::trace::debug;

/// Lines between two cancel checks and progress reports.
const CHECK_EVERY: usize = 256;

/// Axis-aligned bounding box of all vertices.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bounds {
    pub min: [f64; 3],
    pub max: [f64; 3],
}

impl Bounds {
    fn point(p: [f64; 3]) -> Self {
        Self { min: p, max: p }
    }

    fn grow(&mut self, p: [f64; 3]) {
        for axis in 0..3 {
            self.min[axis] = self.min[axis].min(p[axis]);
            self.max[axis] = self.max[axis].max(p[axis]);
        }
    }

    #[must_use]
    pub fn size(&self) -> [f64; 3] {
        [
            self.max[0] - self.min[0],
            self.max[1] - self.min[1],
            self.max[2] - self.min[2],
        ]
    }
}

/// What the background load produces.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SceneModel {
    pub vertices: usize,
    pub texcoords: usize,
    pub normals: usize,
    pub faces: usize,
    /// Faces fanned into triangles.
    pub triangles: usize,
    /// `o` and `g` names in file order.
    pub objects: Vec<String>,
    pub bounds: Option<Bounds>,
}

/// Job body: parses the scene's model file, reporting progress in bytes.
///
/// # Errors
///
/// `Cancelled` when the flag is raised, `Execution` for unreadable or
/// malformed models.
pub fn load_model(info: &SceneInfo, ctx: &JobContext) -> Result<SceneModel, JobError> {
    let path = info.model_path();
    let file = File::open(&path).map_err(|source| {
        JobError::Execution(
            SceneError::Io {
                path: path.clone(),
                source,
            }
            .to_string(),
        )
    })?;
    let total = file
        .metadata()
        .map_or(0, |m| i64::try_from(m.len()).unwrap_or(i64::MAX));

    let label = format!("Loading model '{}'", info.model_file.display());
    let model = parse_obj(BufReader::new(file), &path, |read| {
        ctx.checkpoint()?;
        ctx.report(label.as_str(), read.min(total), 0, total);
        Ok(())
    })?;
    ctx.report(label, total, 0, total);
    debug!(
        path = %path.display(),
        vertices = model.vertices,
        faces = model.faces,
        "model parsed"
    );
    Ok(model)
}

/// Parses OBJ text. `on_chunk` receives the bytes consumed so far every
/// few hundred lines and may abort the parse.
///
/// # Errors
///
/// Anything `on_chunk` returns, read errors, and malformed statements as
/// `Execution` errors naming `origin` and the line.
pub fn parse_obj<R, F>(reader: R, origin: &Path, mut on_chunk: F) -> Result<SceneModel, JobError>
where
    R: BufRead,
    F: FnMut(i64) -> Result<(), JobError>,
{
    let mut model = SceneModel::default();
    let mut consumed: i64 = 0;
    let fail = |line: usize, reason: String| {
        JobError::Execution(
            SceneError::Model {
                path: origin.to_path_buf(),
                line,
                reason,
            }
            .to_string(),
        )
    };

    for (index, line) in reader.lines().enumerate() {
        let line_no = index + 1;
        if index % CHECK_EVERY == 0 {
            on_chunk(consumed)?;
        }
        let line = line.map_err(|e| fail(line_no, e.to_string()))?;
        consumed = consumed.saturating_add(i64::try_from(line.len() + 1).unwrap_or(i64::MAX));

        let mut fields = line.split_whitespace();
        let Some(keyword) = fields.next() else {
            continue;
        };
        match keyword {
            "v" => {
                let p = parse_coords(&mut fields).map_err(|r| fail(line_no, r))?;
                model.bounds = Some(match model.bounds {
                    Some(mut bounds) => {
                        bounds.grow(p);
                        bounds
                    }
                    None => Bounds::point(p),
                });
                model.vertices += 1;
            }
            "vt" => {
                fields
                    .next()
                    .and_then(|u| u.parse::<f64>().ok())
                    .ok_or_else(|| fail(line_no, "texture coordinate needs a u value".into()))?;
                model.texcoords += 1;
            }
            "vn" => {
                parse_coords(&mut fields).map_err(|r| fail(line_no, r))?;
                model.normals += 1;
            }
            "f" => {
                let mut corners = 0;
                for corner in fields {
                    check_corner(corner, &model).map_err(|r| fail(line_no, r))?;
                    corners += 1;
                }
                if corners < 3 {
                    return Err(fail(line_no, format!("face has {corners} vertices, need 3")));
                }
                model.faces += 1;
                model.triangles += corners - 2;
            }
            "o" | "g" => {
                let name = fields.collect::<Vec<_>>().join(" ");
                if !name.is_empty() {
                    model.objects.push(name);
                }
            }
            // comments, materials, smoothing groups, lines, points
            _ => {}
        }
    }
    on_chunk(consumed)?;
    Ok(model)
}

fn parse_coords<'a>(fields: &mut impl Iterator<Item = &'a str>) -> Result<[f64; 3], String> {
    let mut p = [0.0_f64; 3];
    for (axis, value) in p.iter_mut().enumerate() {
        let raw = fields
            .next()
            .ok_or_else(|| format!("expected 3 coordinates, got {axis}"))?;
        *value = raw
            .parse()
            .map_err(|_| format!("bad coordinate '{raw}'"))?;
        if !value.is_finite() {
            return Err(format!("bad coordinate '{raw}'"));
        }
    }
    Ok(p)
}

/// Validates one `v/vt/vn` reference against what has been read so far.
/// Negative indices count back from the most recent element.
fn check_corner(corner: &str, model: &SceneModel) -> Result<(), String> {
    let mut parts = corner.split('/');
    let limits = [model.vertices, model.texcoords, model.normals];
    for (slot, limit) in limits.into_iter().enumerate() {
        let Some(raw) = parts.next() else {
            break;
        };
        if raw.is_empty() && slot > 0 {
            continue;
        }
        let index: i64 = raw
            .parse()
            .map_err(|_| format!("bad face reference '{corner}'"))?;
        let limit = u64::try_from(limit).unwrap_or(u64::MAX);
        let valid = index != 0 && index.unsigned_abs() <= limit;
        if !valid {
            return Err(format!("face reference '{corner}' out of range"));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(text: &str) -> Result<SceneModel, JobError> {
        parse_obj(text.as_bytes(), Path::new("model.obj"), |_| Ok(()))
    }

    const SHED_OBJ: &str = "\
# two triangles and a quad
o Ground
v 0 0 0
v 10 0 0
v 10 5 0
v 0 5 -2
vt 0 0
vn 0 0 1
f 1 2 3
f 1/1/1 3/1/1 4/1/1
g Roof Tiles
f -4 -3 -2 -1
";

    #[test]
    fn counts_statements() {
        let model = parse(SHED_OBJ).unwrap();
        assert_eq!(model.vertices, 4);
        assert_eq!(model.texcoords, 1);
        assert_eq!(model.normals, 1);
        assert_eq!(model.faces, 3);
        assert_eq!(model.triangles, 4);
        assert_eq!(model.objects, vec!["Ground", "Roof Tiles"]);
        let bounds = model.bounds.unwrap();
        assert_eq!(bounds.min, [0.0, 0.0, -2.0]);
        assert_eq!(bounds.max, [10.0, 5.0, 0.0]);
        assert_eq!(bounds.size(), [10.0, 5.0, 2.0]);
    }

    #[test]
    fn rejects_bad_references() {
        let err = parse("v 0 0 0\nv 1 0 0\nf 1 2 3\n").unwrap_err();
        assert_eq!(
            err.to_string(),
            "job failed: model.obj:3: face reference '3' out of range"
        );
        assert!(parse("v 0 0 0\nf 1 1\n").is_err());
        assert!(parse("v 0 0\n").is_err());
        assert!(parse("v 0 0 0\nv 0 1 0\nv 1 0 0\nf 1/2 2 3\n").is_err());
    }

    #[test]
    fn extreme_negative_reference_is_out_of_range() {
        let triangle = "v 0 0 0\nv 0 1 0\nv 1 0 0\n";
        let err = parse(&format!("{triangle}f -9223372036854775808 1 2\n")).unwrap_err();
        assert!(matches!(err, JobError::Execution(_)), "{err:?}");
        assert!(err.to_string().ends_with("out of range"), "{err}");

        let model = parse(&format!("{triangle}f -3 -2 -1\n")).unwrap();
        assert_eq!(model.faces, 1);
        assert!(parse(&format!("{triangle}f -4 1 2\n")).is_err());
    }

    #[test]
    fn empty_model_is_valid() {
        let model = parse("# nothing\n\n").unwrap();
        assert_eq!(model, SceneModel::default());
    }

    #[test]
    fn chunk_callback_can_abort() {
        let text = "v 0 0 0\n".repeat(CHECK_EVERY * 3);
        let mut calls = 0;
        let err = parse_obj(text.as_bytes(), Path::new("big.obj"), |consumed| {
            calls += 1;
            if calls == 2 {
                assert_eq!(consumed, (CHECK_EVERY * 8) as i64);
                return Err(JobError::Cancelled);
            }
            Ok(())
        })
        .unwrap_err();
        assert!(err.is_cancelled());
    }
}
