pub mod common;



#[cfg(test)]
mod test_forfeit;


#[cfg(test)]
mod test_service;
