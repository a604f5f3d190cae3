//! port specifications on destination tokens.

use tailmesh_proto::PortRange;

use crate::error::ParseError;

/// parse the part after the last `:` of a destination token.
///
/// accepts `*`, a single port, an inclusive `low-high` range, or a comma
/// separated list of those (`22,80,8000-8100`).
pub fn parse_ports(spec: &str) -> Result<Vec<PortRange>, ParseError> {
    if spec == "*" {
        return Ok(vec![PortRange::any()]);
    }

    spec.split(',').map(parse_one).collect()
}

fn parse_one(part: &str) -> Result<PortRange, ParseError> {
    let invalid = || ParseError::InvalidPort(part.to_string());

    if part == "*" {
        return Ok(PortRange::any());
    }

    if let Some((first, last)) = part.split_once('-') {
        let first: u16 = first.parse().map_err(|_| invalid())?;
        let last: u16 = last.parse().map_err(|_| invalid())?;
        if first > last {
            return Err(invalid());
        }
        return Ok(PortRange { first, last });
    }

    let port: u16 = part.parse().map_err(|_| invalid())?;
    Ok(PortRange::single(port))
}
